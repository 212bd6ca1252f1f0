use std::collections::BTreeSet;

use axum::extract::ws::{CloseFrame, Message};

use crate::auth::token;
use crate::events::{MessageEventPayload, Provenance, SecurityAlert};
use crate::state::AppState;
use crate::ws::broadcast;
use crate::ws::messages::{
    ClientMessage, ServerMessage, AUTH_FAILED_MESSAGE, AUTH_REQUIRED_MESSAGE,
    AUTH_SUCCESS_MESSAGE, INVALID_FORMAT_MESSAGE, TOO_MANY_CHANNELS_MESSAGE,
    UNSUPPORTED_TYPE_MESSAGE,
};
use crate::ws::{ConnectionId, ConnectionSender, Identity};

/// Authentication state of one connection. Closing is the actor exiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated(Identity),
}

/// What the actor should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Authentication failed: close the transport, process nothing further.
    Close,
}

/// Per-connection state owned by the connection actor.
#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub tx: ConnectionSender,
    pub state: ConnectionState,
}

impl Session {
    pub fn new(id: ConnectionId, tx: ConnectionSender) -> Self {
        Self {
            id,
            tx,
            state: ConnectionState::Connected,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            ConnectionState::Authenticated(identity) => Some(identity),
            ConnectionState::Connected => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }
}

/// Handle an incoming text frame.
/// Parses the JSON control message and dispatches on its type.
pub fn handle_text_message(text: &str, session: &mut Session, state: &AppState) -> Flow {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(
                connection_id = %session.id,
                error = %e,
                "Failed to parse client message"
            );
            send_error(&session.tx, INVALID_FORMAT_MESSAGE);
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::Authenticate { token } => handle_authenticate(&token, session, state),
        ClientMessage::Subscribe { channels } => {
            handle_subscribe(channels, session, state);
            Flow::Continue
        }
        ClientMessage::MessageEvent(payload) => {
            handle_message_event(payload, session, state);
            Flow::Continue
        }
        ClientMessage::SecurityAlert { data } => {
            handle_security_alert(&data, session, state);
            Flow::Continue
        }
        ClientMessage::Unknown => {
            tracing::debug!(connection_id = %session.id, "Unsupported message type");
            send_error(&session.tx, UNSUPPORTED_TYPE_MESSAGE);
            Flow::Continue
        }
    }
}

/// Verify the token and attach the identity. Any failure is terminal and
/// reported to the client with one generic message.
fn handle_authenticate(token: &str, session: &mut Session, state: &AppState) -> Flow {
    match token::verify(token, &state.jwt_secret) {
        Ok(claims) => {
            let identity = Identity {
                user_id: claims.user_id,
                role: claims.role,
            };
            state.registry.set_identity(session.id, identity.clone());
            tracing::info!(
                connection_id = %session.id,
                user_id = identity.user_id,
                role = %identity.role,
                "Connection authenticated"
            );
            session.state = ConnectionState::Authenticated(identity);
            send_message(
                &session.tx,
                &ServerMessage::AuthSuccess {
                    message: AUTH_SUCCESS_MESSAGE.to_string(),
                },
            );
            Flow::Continue
        }
        Err(err) => {
            tracing::warn!(
                connection_id = %session.id,
                reason = %err,
                "Authentication failed"
            );
            send_message(
                &session.tx,
                &ServerMessage::AuthError {
                    message: AUTH_FAILED_MESSAGE.to_string(),
                },
            );
            Flow::Close
        }
    }
}

/// Replace the connection's channel set and echo the normalized list back.
fn handle_subscribe(channels: Vec<String>, session: &Session, state: &AppState) {
    if !session.is_authenticated() {
        send_error(&session.tx, AUTH_REQUIRED_MESSAGE);
        return;
    }

    let channels: BTreeSet<String> = channels
        .iter()
        .map(|channel| channel.trim())
        .filter(|channel| !channel.is_empty())
        .map(str::to_string)
        .collect();

    if channels.len() > state.settings.max_channels {
        tracing::debug!(
            connection_id = %session.id,
            requested = channels.len(),
            "Subscription rejected, too many channels"
        );
        send_error(&session.tx, TOO_MANY_CHANNELS_MESSAGE);
        return;
    }

    state.registry.set_subscriptions(session.id, channels.clone());
    send_message(
        &session.tx,
        &ServerMessage::SubscriptionUpdate {
            channels: channels.into_iter().collect(),
        },
    );
}

/// Relay a message event from this client to other users. Clients may only
/// address explicit recipients; invalid events are dropped without reply.
fn handle_message_event(mut payload: MessageEventPayload, session: &Session, state: &AppState) {
    let Some(identity) = session.identity() else {
        send_error(&session.tx, AUTH_REQUIRED_MESSAGE);
        return;
    };

    payload.roles = None;
    match payload.into_dispatch(
        Provenance::from_identity(identity),
        state.settings.preview_max_chars,
    ) {
        Ok(dispatch) => {
            broadcast::dispatch(
                &state.registry,
                &dispatch.target,
                &ServerMessage::MessageNotification(dispatch.notification),
            );
        }
        Err(e) => {
            tracing::debug!(
                connection_id = %session.id,
                user_id = identity.user_id,
                error = %e,
                "Dropped client message event"
            );
        }
    }
}

/// Only admins may broadcast alerts. Alerts from anyone else are ignored
/// without telling the sender.
fn handle_security_alert(alert: &SecurityAlert, session: &Session, state: &AppState) {
    let Some(identity) = session.identity() else {
        send_error(&session.tx, AUTH_REQUIRED_MESSAGE);
        return;
    };

    if !identity.role.is_admin() {
        tracing::debug!(
            connection_id = %session.id,
            user_id = identity.user_id,
            role = %identity.role,
            "Ignored security alert from non-admin"
        );
        return;
    }

    if let Err(e) = alert.validate() {
        tracing::debug!(connection_id = %session.id, error = %e, "Dropped security alert");
        send_error(&session.tx, INVALID_FORMAT_MESSAGE);
        return;
    }

    broadcast::broadcast_security_alert(&state.registry, alert);
}

/// Encode and queue a message for this connection.
pub fn send_message(tx: &ConnectionSender, message: &ServerMessage) {
    match message.to_frame() {
        Ok(frame) => {
            let _ = tx.send(frame);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize {}", message.kind());
        }
    }
}

/// Send a generic error message.
pub fn send_error(tx: &ConnectionSender, message: &str) {
    send_message(tx, &ServerMessage::error(message));
}

/// Queue a close frame; the writer task stops after sending it.
pub fn send_close(tx: &ConnectionSender, code: u16, reason: &str) {
    let _ = tx.send(Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    })));
}
