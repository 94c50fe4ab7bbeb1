use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::presence::{self, PresenceStatus};
use crate::registry::MembershipSnapshot;
use crate::state::AppState;
use crate::ws::protocol;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Prevents connection leaks from abrupt disconnects.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming frames, dispatches to protocol handlers
///
/// The mpsc sender is the connection's send capability: the registry holds
/// a clone so broadcasts from anywhere in the system reach this client.
///
/// Lifecycle: the connection is Active from the moment `connect` returns
/// until the reader loop exits; every exit path then funnels through the
/// single cleanup block below, and the registry disconnect there is
/// idempotent, so concurrent error signals cannot double-remove it.
pub async fn run_connection(
    socket: WebSocket,
    state: AppState,
    username: String,
    snapshot: MembershipSnapshot,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Admit the connection: indexed under every scope in the snapshot.
    let first_connection = !state.registry.identity_online(&username);
    let handle = state.registry.connect(&username, snapshot, tx.clone());

    // Broadcast ONLINE only for the identity's first connection.
    if first_connection {
        presence::set_presence(&state, &username, PresenceStatus::Online);
    }

    // Send the current presence snapshot to the newly connected client.
    presence::send_snapshot(&state, &tx);

    tracing::info!(username = %username, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_client_frame(text.as_str(), &tx, &state, &handle);
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames; binary is ignored.
                    tracing::debug!(username = %username, "Ignoring binary frame");
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        username = %username,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    username = %username,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(username = %username, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks, then unregister. disconnect is
    // idempotent; the broadcast path may already have pruned this handle.
    writer_handle.abort();
    ping_handle.abort();
    state.registry.disconnect(&handle);

    // Only broadcast OFFLINE if this was the identity's last connection.
    if !state.registry.identity_online(&username) {
        presence::set_presence(&state, &username, PresenceStatus::Offline);
    }

    tracing::info!(username = %username, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
