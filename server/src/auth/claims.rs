use std::fmt;

use serde::{Deserialize, Serialize};

/// Role carried in a client token.
///
/// The web application only issues `student`, `tutor` and `admin`. Any other
/// value is kept verbatim so a newer issuer cannot crash the relay; such
/// connections simply never match a role-scoped target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Student,
    Tutor,
    Admin,
    Other(String),
}

/// Role attached to events that no human user sent (bridge calls without a sender).
pub const SYSTEM_ROLE: &str = "system";

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Student => "student",
            Self::Tutor => "tutor",
            Self::Admin => "admin",
            Self::Other(other) => other,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "student" => Self::Student,
            "tutor" => Self::Tutor,
            "admin" => Self::Admin,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity extracted from a verified client token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// External user id (`sub`)
    pub user_id: i64,
    pub role: Role,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
}
