//! Broadcast fan-out to online scope members.
//!
//! Delivery is best-effort: the recipient list is captured from the
//! registry, sends happen outside the registry lock, and any connection
//! whose transport refuses the send is pruned on the spot without aborting
//! delivery to the rest. Zero recipients is a normal outcome.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{ConnectionRegistry, ScopeId};

/// Message kinds carried over the real-time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// A chat message originating from a client connection.
    Chat,
    /// A system notification triggered by request handling (new DM thread,
    /// channel membership change).
    Notification,
    /// An online/offline presence event.
    Presence,
}

/// The unit fanned out to online members of a scope. Immutable once
/// constructed; delivered verbatim as a JSON text frame. The format is the
/// same whether the message originated on a socket or from a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub sender: String,
    /// Target scope. Presence events carry no scope and fan out to every
    /// open connection instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeId>,
    pub payload: Value,
}

impl Envelope {
    pub fn chat(sender: &str, scope: ScopeId, payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::Chat,
            sender: sender.to_string(),
            scope: Some(scope),
            payload,
        }
    }

    pub fn notification(sender: &str, scope: ScopeId, payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::Notification,
            sender: sender.to_string(),
            scope: Some(scope),
            payload,
        }
    }

    pub fn presence(sender: &str, payload: Value) -> Self {
        Self {
            kind: EnvelopeKind::Presence,
            sender: sender.to_string(),
            scope: None,
            payload,
        }
    }
}

/// Deliver an envelope to every online member of its target scope.
///
/// When `exclude_sender` is set, connections owned by the envelope's sender
/// are skipped — a client's own chat message is not echoed back unless it
/// asks. Route-triggered notifications pass `false` so the acting identity
/// hears about its own mutation on every device.
///
/// Returns the number of connections the envelope was handed to. A failed
/// send means the peer's transport is gone; that connection is disconnected
/// and the fan-out continues.
pub fn deliver(registry: &ConnectionRegistry, envelope: &Envelope, exclude_sender: bool) -> usize {
    let Some(scope) = envelope.scope else {
        tracing::warn!(kind = ?envelope.kind, "envelope without scope passed to deliver");
        return 0;
    };

    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize envelope");
            return 0;
        }
    };

    let mut delivered = 0;
    for handle in registry.members_online(scope) {
        if exclude_sender && handle.identity == envelope.sender {
            continue;
        }
        if handle.sender.send(Message::Text(text.clone().into())).is_ok() {
            delivered += 1;
        } else {
            // Receiver dropped: the connection's writer is gone. Prune it.
            tracing::debug!(
                identity = %handle.identity,
                "delivery failed, pruning connection"
            );
            registry.disconnect(&handle);
        }
    }

    tracing::debug!(kind = ?envelope.kind, ?scope, delivered, "envelope delivered");
    delivered
}

/// Deliver an envelope to every open connection regardless of scope.
/// Used for presence events. Same pruning semantics as `deliver`.
pub fn deliver_all(registry: &ConnectionRegistry, envelope: &Envelope) -> usize {
    let text = match serde_json::to_string(envelope) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize envelope");
            return 0;
        }
    };

    let mut delivered = 0;
    for handle in registry.connections_snapshot() {
        if handle.sender.send(Message::Text(text.clone().into())).is_ok() {
            delivered += 1;
        } else {
            registry.disconnect(&handle);
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionSender, MembershipSnapshot};
    use axum::extract::ws::Message;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn channel() -> (ConnectionSender, UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn snapshot(scope: ScopeId) -> MembershipSnapshot {
        [scope].into_iter().collect()
    }

    fn recv_envelope(rx: &mut UnboundedReceiver<Message>) -> Envelope {
        match rx.try_recv().expect("expected a delivered message") {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn delivers_to_all_scope_members() {
        let registry = ConnectionRegistry::new();
        let scope = ScopeId::channel(1);
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.connect("alice", snapshot(scope), tx_a);
        registry.connect("bob", snapshot(scope), tx_b);

        let envelope = Envelope::chat("alice", scope, serde_json::json!({"body": "hi"}));
        let delivered = deliver(&registry, &envelope, false);

        assert_eq!(delivered, 2);
        assert_eq!(recv_envelope(&mut rx_a).sender, "alice");
        assert_eq!(recv_envelope(&mut rx_b).payload["body"], "hi");
    }

    #[test]
    fn exclude_sender_suppresses_echo_only() {
        let registry = ConnectionRegistry::new();
        let scope = ScopeId::dm(42);
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.connect("alice", snapshot(scope), tx_a);
        registry.connect("bob", snapshot(scope), tx_b);

        let envelope = Envelope::chat("alice", scope, serde_json::json!({"body": "hi"}));
        let delivered = deliver(&registry, &envelope, true);

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err(), "sender must not receive an echo");
        assert_eq!(recv_envelope(&mut rx_b).payload["body"], "hi");
    }

    #[test]
    fn zero_recipients_is_success() {
        let registry = ConnectionRegistry::new();
        let envelope = Envelope::notification(
            "system",
            ScopeId::channel(9),
            serde_json::json!({"type": "noop"}),
        );
        assert_eq!(deliver(&registry, &envelope, false), 0);
    }

    #[test]
    fn dead_transport_is_pruned_without_aborting_fanout() {
        let registry = ConnectionRegistry::new();
        let scope = ScopeId::channel(1);
        let (tx_dead, rx_dead) = channel();
        let (tx_live, mut rx_live) = channel();
        let dead = registry.connect("alice", snapshot(scope), tx_dead);
        registry.connect("bob", snapshot(scope), tx_live);

        // Tear down alice's transport without disconnecting her.
        drop(rx_dead);

        let envelope =
            Envelope::notification("system", scope, serde_json::json!({"type": "ping"}));
        let delivered = deliver(&registry, &envelope, false);

        assert_eq!(delivered, 1, "live recipient still served");
        assert_eq!(recv_envelope(&mut rx_live).payload["type"], "ping");

        // The dead connection was pruned from the registry.
        let online = registry.members_online(scope);
        assert_eq!(online.len(), 1);
        assert!(online.iter().all(|h| h.id != dead.id));
    }

    #[test]
    fn presence_envelope_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.connect("alice", snapshot(ScopeId::channel(1)), tx_a);
        registry.connect("bob", snapshot(ScopeId::dm(2)), tx_b);

        let envelope = Envelope::presence("alice", serde_json::json!({"status": "online"}));
        assert_eq!(deliver_all(&registry, &envelope), 2);
        assert_eq!(recv_envelope(&mut rx_a).kind, EnvelopeKind::Presence);
        assert_eq!(recv_envelope(&mut rx_b).sender, "alice");
    }
}
