use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PayloadError;
use crate::auth::claims::SYSTEM_ROLE;
use crate::auth::Role;
use crate::ws::broadcast::TargetSpec;
use crate::ws::Identity;

/// Who an event is attributed to in the delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub sender_id: i64,
    pub sender_role: String,
}

impl Provenance {
    /// Synthetic sender for events no human user originated.
    pub fn system() -> Self {
        Self {
            sender_id: 0,
            sender_role: SYSTEM_ROLE.to_string(),
        }
    }

    pub fn from_identity(identity: &Identity) -> Self {
        Self {
            sender_id: identity.user_id,
            sender_role: identity.role.to_string(),
        }
    }

    /// Attribution from bridge fields; absent or unparseable fields fall back
    /// to the system sender's values.
    pub fn from_fields(sender_id: Option<&Value>, sender_role: Option<&str>) -> Self {
        let system = Self::system();
        Self {
            sender_id: sender_id.and_then(parse_id).unwrap_or(system.sender_id),
            sender_role: sender_role
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .unwrap_or(system.sender_role),
        }
    }
}

/// Message event fields shared by client `message_event` frames and bridge
/// callbacks. Ids may arrive as JSON numbers or numeric strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEventPayload {
    pub recipients: Option<Vec<Value>>,
    pub roles: Option<Vec<String>>,
    pub thread_id: Option<Value>,
    /// Camel-case spelling some callers send; wins over `thread_id`
    #[serde(rename = "threadId")]
    pub thread_id_camel: Option<Value>,
    pub preview: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

/// Body of a `message_notification` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNotification {
    pub thread_id: i64,
    pub preview: String,
    pub sender_id: i64,
    pub sender_role: String,
    /// RFC 3339 UTC timestamp with millisecond precision
    pub created_at: String,
    pub metadata: Map<String, Value>,
}

/// A validated message event ready for fan-out.
#[derive(Debug, Clone)]
pub struct MessageDispatch {
    pub target: TargetSpec,
    pub notification: MessageNotification,
}

impl MessageEventPayload {
    /// Validate and normalize into a dispatch. Explicit recipients take
    /// precedence over `roles`.
    pub fn into_dispatch(
        self,
        sender: Provenance,
        preview_max_chars: usize,
    ) -> Result<MessageDispatch, PayloadError> {
        let target = self.target()?;
        let thread_id = self
            .thread_id_camel
            .as_ref()
            .or(self.thread_id.as_ref())
            .and_then(parse_id)
            .filter(|id| *id > 0)
            .ok_or(PayloadError::InvalidThreadId)?;

        let notification = MessageNotification {
            thread_id,
            preview: truncate_preview(
                self.preview.as_deref().unwrap_or_default(),
                preview_max_chars,
            ),
            sender_id: sender.sender_id,
            sender_role: sender.sender_role,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            metadata: self.metadata.unwrap_or_default(),
        };

        Ok(MessageDispatch {
            target,
            notification,
        })
    }

    fn target(&self) -> Result<TargetSpec, PayloadError> {
        let user_ids: BTreeSet<i64> = self
            .recipients
            .iter()
            .flatten()
            .filter_map(parse_id)
            .filter(|id| *id > 0)
            .collect();
        if !user_ids.is_empty() {
            return Ok(TargetSpec::Users(user_ids));
        }

        let mut roles: BTreeSet<Role> = self
            .roles
            .iter()
            .flatten()
            .map(|role| role.trim())
            .filter(|role| !role.is_empty())
            .map(Role::from)
            .collect();
        if roles.len() > 1 {
            return Ok(TargetSpec::Roles(roles));
        }
        roles
            .pop_first()
            .map(TargetSpec::Role)
            .ok_or(PayloadError::NoRecipients)
    }
}

/// Integer id from a JSON number or a numeric string.
fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Trim and cap a preview at `max_chars` characters (not bytes).
pub fn truncate_preview(preview: &str, max_chars: usize) -> String {
    preview.trim().chars().take(max_chars).collect()
}
