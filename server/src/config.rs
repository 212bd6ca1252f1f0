use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default path the bridge listens on for backend callbacks.
pub const DEFAULT_BRIDGE_PATH: &str = "/notify/messages";

/// Realtime notification relay
///
/// Every field is optional here so that only flags and variables the operator
/// actually set override the TOML file.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "relay-server", version, about = "Realtime notification relay")]
pub struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    #[serde(skip)]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Print a development token for USER_ID:ROLE signed with the configured
    /// JWT secret, then exit
    #[arg(long, value_name = "USER_ID:ROLE")]
    #[serde(skip)]
    pub mint_token: Option<String>,

    /// Bind address for both listeners
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Port accepting client WebSocket connections
    #[arg(long, env = "WS_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_port: Option<u16>,

    /// Port of the backend bridge HTTP listener
    #[arg(long, env = "REALTIME_BRIDGE_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_port: Option<u16>,

    /// Secret used to verify client tokens (shared with the web application)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Shared secret backend processes present to the bridge
    #[arg(long, env = "REALTIME_BRIDGE_SECRET", hide_env_values = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_secret: Option<String>,

    /// Path accepted by the bridge listener
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_path: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,
}

/// Resolved relay configuration.
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    pub bind_address: String,
    pub ws_port: u16,
    pub bridge_port: u16,
    pub jwt_secret: String,
    pub bridge_secret: String,
    pub bridge_path: String,
    pub json_logs: bool,
    /// Connection and payload limits (loaded from [limits] section in TOML)
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Tunables for connection lifetime and payload sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Seconds a new connection may stay unauthenticated (default: 30)
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,

    /// Largest bridge request body accepted, in bytes (default: 65536)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Preview length cap in characters (default: 180)
    #[serde(default = "default_preview_max_chars")]
    pub preview_max_chars: usize,

    /// Distinct channels one connection may subscribe to (default: 32)
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            preview_max_chars: default_preview_max_chars(),
            max_channels: default_max_channels(),
        }
    }
}

fn default_auth_timeout_secs() -> u64 {
    30
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_preview_max_chars() -> usize {
    180
}

fn default_max_channels() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            ws_port: 8080,
            bridge_port: 8090,
            jwt_secret: String::new(),
            bridge_secret: String::new(),
            bridge_path: DEFAULT_BRIDGE_PATH.to_string(),
            json_logs: false,
            limits: LimitsConfig::default(),
        }
    }
}

/// Reasons the relay refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT secret is empty; set JWT_SECRET or --jwt-secret")]
    MissingJwtSecret,
    #[error("bridge secret is empty; set REALTIME_BRIDGE_SECRET or --bridge-secret")]
    MissingBridgeSecret,
    #[error("WebSocket and bridge listeners cannot share port {0}")]
    PortConflict(u16),
    #[error("bridge path must start with '/' and be a literal path, got {0:?}")]
    InvalidBridgePath(String),
    #[error("limit {0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Runtime view of the configuration handed to the routers.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bridge_path: String,
    pub auth_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_body_bytes: usize,
    pub preview_max_chars: usize,
    pub max_channels: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Config::default().relay_settings()
    }
}

impl Config {
    /// Layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args and their env aliases
    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("RELAY_"))
            .merge(Serialized::defaults(cli))
    }

    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }
        if self.bridge_secret.is_empty() {
            return Err(ConfigError::MissingBridgeSecret);
        }
        if self.ws_port != 0 && self.ws_port == self.bridge_port {
            return Err(ConfigError::PortConflict(self.ws_port));
        }
        // Route syntax characters would make the router panic at startup
        if !self.bridge_path.starts_with('/')
            || self.bridge_path.contains(&[':', '*', '{', '}'][..])
        {
            return Err(ConfigError::InvalidBridgePath(self.bridge_path.clone()));
        }

        let limits = &self.limits;
        for (name, value) in [
            ("auth_timeout_secs", limits.auth_timeout_secs as usize),
            ("ping_interval_secs", limits.ping_interval_secs as usize),
            ("pong_timeout_secs", limits.pong_timeout_secs as usize),
            ("max_body_bytes", limits.max_body_bytes),
            ("preview_max_chars", limits.preview_max_chars),
            ("max_channels", limits.max_channels),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        Ok(())
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            bridge_path: self.bridge_path.clone(),
            auth_timeout: Duration::from_secs(self.limits.auth_timeout_secs),
            ping_interval: Duration::from_secs(self.limits.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.limits.pong_timeout_secs),
            max_body_bytes: self.limits.max_body_bytes,
            preview_max_chars: self.limits.preview_max_chars,
            max_channels: self.limits.max_channels,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Realtime Notification Relay Configuration
# Place this file at ./relay.toml or specify with --config <path>
# Settings can be overridden via RELAY_* environment variables,
# the well-known variables below, or CLI flags.

# Bind address for both listeners (default: 0.0.0.0)
# bind_address = "0.0.0.0"

# Client WebSocket port (default: 8080, env WS_PORT)
# ws_port = 8080

# Backend bridge HTTP port (default: 8090, env REALTIME_BRIDGE_PORT)
# bridge_port = 8090

# Token signing secret, must match the web application (env JWT_SECRET)
# jwt_secret = ""

# Shared secret backend processes send to the bridge (env REALTIME_BRIDGE_SECRET)
# bridge_secret = ""

# Bridge callback path (default: /notify/messages)
# bridge_path = "/notify/messages"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Limits ----
# [limits]
# auth_timeout_secs = 30    # unauthenticated connections are closed after this
# ping_interval_secs = 30   # server keepalive ping period
# pong_timeout_secs = 10    # close when no pong arrives within this window
# max_body_bytes = 65536    # larger bridge bodies are rejected with 400
# preview_max_chars = 180   # message previews are truncated to this many characters
# max_channels = 32         # distinct channels per subscribe message
"#
    .to_string()
}
