//! Inbound wire protocol: JSON frames from client connections.

use axum::extract::ws::Message;
use serde::Deserialize;

use crate::broadcast::{self, Envelope};
use crate::registry::{ConnectionHandle, ConnectionSender, ScopeId};
use crate::state::AppState;

/// Frames a client may send over an established connection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A chat message addressed to a scope the sender belongs to.
    /// `echo: true` asks for the message to be delivered back to the
    /// sender's own connections as well; by default it is suppressed.
    Chat {
        scope: ScopeId,
        body: String,
        #[serde(default)]
        echo: bool,
    },
}

/// Handle one incoming text frame: decode, guard, dispatch.
/// Malformed or unauthorized frames get an error frame back; they do not
/// terminate the connection.
pub fn handle_client_frame(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    handle: &ConnectionHandle,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(
                username = %handle.identity,
                error = %e,
                "Failed to decode client frame"
            );
            send_error(tx, "invalid frame");
            return;
        }
    };

    match frame {
        ClientFrame::Chat { scope, body, echo } => {
            // Membership guard: a connection may only address scopes it is
            // indexed under.
            if !state.registry.is_member(handle, scope) {
                tracing::debug!(
                    username = %handle.identity,
                    ?scope,
                    "Chat frame for scope sender is not a member of"
                );
                send_error(tx, "not a member of this scope");
                return;
            }

            let envelope = Envelope::chat(
                &handle.identity,
                scope,
                serde_json::json!({"body": body}),
            );
            broadcast::deliver(&state.registry, &envelope, !echo);
        }
    }
}

/// Send an error frame back to one client.
fn send_error(tx: &ConnectionSender, message: &str) {
    let frame = serde_json::json!({"kind": "error", "message": message});
    let _ = tx.send(Message::Text(frame.to_string().into()));
}
