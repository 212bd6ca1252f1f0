use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};

use crate::state::AppState;
use crate::ws::messages::{
    ServerMessage, AUTH_FAILED_MESSAGE, CONNECTED_MESSAGE, INVALID_FORMAT_MESSAGE,
};
use crate::ws::protocol::{self, Flow, Session};
use crate::ws::ConnectionId;

/// Close codes sent to clients.
const CLOSE_AUTH_FAILED: u16 = 4001;
const CLOSE_AUTH_TIMEOUT: u16 = 4008;
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the actor-per-connection pattern for one WebSocket.
///
/// The socket is split in two halves:
/// - Writer task: owns the sink, forwards frames queued on an mpsc channel
/// - This task: reads frames in order and drives the session state machine
///
/// Fan-out reaches the client by cloning the queue sender out of the registry.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let id = ConnectionId::new();
    state.registry.register(id, tx.clone());
    tracing::info!(connection_id = %id, "WebSocket connection opened");

    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut session = Session::new(id, tx);
    protocol::send_message(
        &session.tx,
        &ServerMessage::Connection {
            message: CONNECTED_MESSAGE.to_string(),
        },
    );

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (keepalive_tx, mut keepalive_lost) = oneshot::channel::<()>();
    let ping_handle = tokio::spawn(ping_task(
        session.tx.clone(),
        pong_rx,
        keepalive_tx,
        state.settings.ping_interval,
        state.settings.pong_timeout,
    ));

    let auth_deadline = sleep_until(Instant::now() + state.settings.auth_timeout);
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            lost = &mut keepalive_lost => {
                // An Err means the ping task saw the writer die first
                if lost.is_ok() {
                    tracing::warn!(connection_id = %id, "Pong timeout, closing connection");
                    protocol::send_close(&session.tx, CLOSE_GOING_AWAY, "Pong timeout");
                }
                break;
            }
            _ = &mut auth_deadline, if !session.is_authenticated() => {
                tracing::info!(connection_id = %id, "Authentication timed out");
                protocol::send_message(
                    &session.tx,
                    &ServerMessage::AuthError {
                        message: AUTH_FAILED_MESSAGE.to_string(),
                    },
                );
                protocol::send_close(&session.tx, CLOSE_AUTH_TIMEOUT, "Authentication timeout");
                break;
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        if protocol::handle_text_message(text.as_str(), &mut session, &state)
                            == Flow::Close
                        {
                            protocol::send_close(
                                &session.tx,
                                CLOSE_AUTH_FAILED,
                                AUTH_FAILED_MESSAGE,
                            );
                            break;
                        }
                    }
                    Message::Binary(data) => {
                        tracing::debug!(
                            connection_id = %id,
                            len = data.len(),
                            "Received binary frame on a text protocol"
                        );
                        protocol::send_error(&session.tx, INVALID_FORMAT_MESSAGE);
                    }
                    Message::Ping(data) => {
                        let _ = session.tx.send(Message::Pong(data));
                    }
                    Message::Pong(_) => {
                        let _ = pong_tx.send(());
                    }
                    Message::Close(frame) => {
                        tracing::info!(
                            connection_id = %id,
                            reason = ?frame,
                            "Client initiated close"
                        );
                        break;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!(connection_id = %id, "WebSocket stream ended");
                    break;
                }
            },
        }
    }

    // Unregister before the queue goes away so fan-outs stop picking it up
    state.registry.remove(id);
    ping_handle.abort();
    drop(session);

    // With every sender gone the writer drains what is queued, then exits
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(connection_id = %id, "WebSocket connection closed");
}

/// Writer task: forwards queued frames to the WebSocket sink.
/// Stops on a send failure or after a close frame went out.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Ping task: pings on every tick and waits for the pong. A missing pong
/// fires `keepalive_lost` and ends the task.
async fn ping_task(
    tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    keepalive_lost: oneshot::Sender<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Drop pongs that arrived late for an earlier ping
        while pong_rx.try_recv().is_ok() {}

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer is gone, the connection is closing anyway
            return;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                let _ = keepalive_lost.send(());
                return;
            }
        }
    }
}
