//! Normalization of relayed events into outbound notification messages.

pub mod alert;
pub mod message;

pub use alert::SecurityAlert;
pub use message::{MessageDispatch, MessageEventPayload, MessageNotification, Provenance};

/// Why an event payload cannot be dispatched. Nothing is delivered when one
/// of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("no valid recipients")]
    NoRecipients,
    #[error("thread id must be a positive integer")]
    InvalidThreadId,
    #[error("alert type must not be empty")]
    EmptyAlertType,
}
