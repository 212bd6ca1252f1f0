//! Realtime notification relay library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod events;
pub mod routes;
pub mod state;
pub mod ws;
