use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::events::{MessageEventPayload, PayloadError, Provenance, SecurityAlert};
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::messages::ServerMessage;

/// Failure answers of the bridge. Bodies stay generic.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("missing or incorrect bridge secret")]
    Unauthorized,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("not found")]
    NotFound,
}

impl From<PayloadError> for BridgeError {
    fn from(err: PayloadError) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            Self::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "Invalid payload"),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found"),
        };
        (status, body).into_response()
    }
}

/// Body of a bridge callback once the secret has been checked and removed.
///
/// Either an `alert` for the security alert fan-out, or message fields
/// (`recipients` or `roles`, `thread_id`, `preview`, `metadata`).
#[derive(Debug, Default, Deserialize)]
pub struct BridgeRequest {
    pub sender_id: Option<Value>,
    pub sender_role: Option<String>,
    pub alert: Option<SecurityAlert>,
    #[serde(flatten)]
    pub message: MessageEventPayload,
}

/// POST {bridge_path}
/// Authenticates the backend by shared secret and fans the event out.
/// Answers 200 whether or not any recipient is connected.
pub async fn notify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Body,
) -> Result<&'static str, BridgeError> {
    let bytes = to_bytes(body, state.settings.max_body_bytes)
        .await
        .map_err(|e| {
            tracing::warn!(peer = %addr, error = %e, "Bridge body rejected");
            BridgeError::InvalidPayload("body too large or unreadable".to_string())
        })?;

    let mut fields = parse_body(&bytes).inspect_err(|e| {
        tracing::warn!(peer = %addr, error = %e, "Bridge body is not a JSON object");
    })?;

    let secret = fields.remove("secret");
    if !secret_matches(secret.as_ref(), &state.bridge_secret) {
        tracing::warn!(peer = %addr, "Bridge request with missing or incorrect secret");
        return Err(BridgeError::Unauthorized);
    }

    let request: BridgeRequest = serde_json::from_value(Value::Object(fields)).map_err(|e| {
        tracing::warn!(peer = %addr, error = %e, "Bridge payload has invalid fields");
        BridgeError::InvalidPayload(e.to_string())
    })?;

    handle_request(&state, request).inspect_err(|e| {
        tracing::warn!(peer = %addr, error = %e, "Bridge payload rejected");
    })?;
    Ok("OK")
}

/// Fallback for every path and method the bridge does not serve.
pub async fn not_found() -> BridgeError {
    BridgeError::NotFound
}

/// An empty body counts as an empty object, so it fails on the secret.
fn parse_body(bytes: &[u8]) -> Result<serde_json::Map<String, Value>, BridgeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(BridgeError::InvalidPayload("expected a JSON object".to_string())),
        Err(e) => Err(BridgeError::InvalidPayload(e.to_string())),
    }
}

fn secret_matches(provided: Option<&Value>, expected: &[u8]) -> bool {
    match provided {
        Some(Value::String(secret)) => secret.as_bytes().ct_eq(expected).into(),
        _ => false,
    }
}

/// Validate and fan out an authenticated request. Nothing is delivered when
/// validation fails.
fn handle_request(state: &AppState, request: BridgeRequest) -> Result<(), BridgeError> {
    if let Some(alert) = request.alert {
        alert.validate()?;
        broadcast::broadcast_security_alert(&state.registry, &alert);
        return Ok(());
    }

    let sender =
        Provenance::from_fields(request.sender_id.as_ref(), request.sender_role.as_deref());
    let dispatch = request
        .message
        .into_dispatch(sender, state.settings.preview_max_chars)?;
    let thread_id = dispatch.notification.thread_id;
    let report = broadcast::dispatch(
        &state.registry,
        &dispatch.target,
        &ServerMessage::MessageNotification(dispatch.notification),
    );
    tracing::info!(
        thread_id,
        matched = report.matched,
        delivered = report.delivered,
        "Bridge notification dispatched"
    );
    Ok(())
}
