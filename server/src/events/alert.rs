use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PayloadError;

/// Channel admins subscribe to for non-critical security alerts.
pub const SECURITY_ALERTS_CHANNEL: &str = "security_alerts";

/// Alert types delivered to every connected admin, subscribed or not.
pub const CRITICAL_ALERT_TYPES: [&str; 4] = [
    "brute_force_attempt",
    "suspicious_ip",
    "account_locked",
    "admin_action",
];

/// A security alert as sent by an admin client or a backend process.
/// Fields other than `type` are relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl SecurityAlert {
    pub fn is_critical(&self) -> bool {
        CRITICAL_ALERT_TYPES.contains(&self.kind.as_str())
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.kind.trim().is_empty() {
            return Err(PayloadError::EmptyAlertType);
        }
        Ok(())
    }
}
