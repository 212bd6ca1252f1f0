//! JSON frames exchanged with clients.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::events::{MessageEventPayload, MessageNotification, SecurityAlert};

pub const CONNECTED_MESSAGE: &str = "Connected to security notification server";
pub const AUTH_SUCCESS_MESSAGE: &str = "Authentication successful";
/// Sent for every authentication failure, whatever the cause.
pub const AUTH_FAILED_MESSAGE: &str = "Authentication failed";
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format";
pub const UNSUPPORTED_TYPE_MESSAGE: &str = "Unsupported message type";
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";
pub const TOO_MANY_CHANNELS_MESSAGE: &str = "Too many channels";

/// Control messages a client may send, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    Subscribe {
        channels: Vec<String>,
    },
    SecurityAlert {
        data: SecurityAlert,
    },
    MessageEvent(MessageEventPayload),
    /// Any `type` this relay does not know.
    #[serde(other)]
    Unknown,
}

/// Messages the relay sends to clients, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connection { message: String },
    AuthSuccess { message: String },
    AuthError { message: String },
    SubscriptionUpdate { channels: Vec<String> },
    MessageNotification(MessageNotification),
    SecurityAlert { data: SecurityAlert },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Wire name of the message, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::AuthSuccess { .. } => "auth_success",
            Self::AuthError { .. } => "auth_error",
            Self::SubscriptionUpdate { .. } => "subscription_update",
            Self::MessageNotification(_) => "message_notification",
            Self::SecurityAlert { .. } => "security_alert",
            Self::Error { .. } => "error",
        }
    }

    /// Encode as a WebSocket text frame.
    pub fn to_frame(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}
