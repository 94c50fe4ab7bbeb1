//! In-memory presence tracking.
//!
//! DashMap keyed by username, updated from the connection actor lifecycle:
//! ONLINE on an identity's first connection, OFFLINE after its last one
//! closes. Changes fan out to every open connection; a newly admitted
//! connection gets the current map as a snapshot.

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;

use crate::broadcast::{self, Envelope};
use crate::registry::ConnectionSender;
use crate::state::AppState;

/// Presence status values as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Shared presence map: username -> last announced status.
pub type PresenceMap = Arc<DashMap<String, PresenceStatus>>;

/// Record a user's presence and broadcast the change to all connections.
pub fn set_presence(state: &AppState, username: &str, status: PresenceStatus) {
    state.presence.insert(username.to_string(), status);

    let envelope = Envelope::presence(
        username,
        serde_json::json!({"username": username, "status": status.as_str()}),
    );
    broadcast::deliver_all(&state.registry, &envelope);
}

/// Push the current presence map to one connection. Called once when a
/// connection is admitted, before it starts receiving live events.
pub fn send_snapshot(state: &AppState, tx: &ConnectionSender) {
    for entry in state.presence.iter() {
        let envelope = Envelope::presence(
            entry.key(),
            serde_json::json!({"username": entry.key(), "status": entry.value().as_str()}),
        );
        if let Ok(text) = serde_json::to_string(&envelope) {
            let _ = tx.send(Message::Text(text.into()));
        }
    }
}
