//! Connection registry: the shared mutable state behind the real-time layer.
//!
//! Tracks, for each authenticated identity, its currently open connections
//! and the set of scopes (channels, DM threads) those connections are
//! indexed under. A scope index is maintained explicitly so that broadcast
//! fan-out never goes back to persistence, and so that membership granted
//! mid-session (`add_scope`) reaches already-open connections without a
//! reconnect.
//!
//! All index mutation happens under one coarse mutex. No I/O ever runs
//! inside the critical section; actual sends happen after the recipient
//! list is captured.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel. Cloning it lets any part
/// of the system push messages to that client; the receiving end is drained
/// by the connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Discriminates the two scope id spaces. Channel ids and DM thread ids are
/// both SQLite rowids and collide numerically, so registry keys carry the
/// kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Channel,
    Dm,
}

/// A message-addressing unit: one group channel or one DM thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId {
    pub kind: ScopeKind,
    pub id: i64,
}

impl ScopeId {
    pub fn channel(id: i64) -> Self {
        Self {
            kind: ScopeKind::Channel,
            id,
        }
    }

    pub fn dm(id: i64) -> Self {
        Self {
            kind: ScopeKind::Dm,
            id,
        }
    }
}

/// The set of scopes an identity belongs to, as loaded from persistence at
/// connect time. Only ever grows for the life of a connection.
#[derive(Debug, Clone, Default)]
pub struct MembershipSnapshot {
    scopes: HashSet<ScopeId>,
}

impl MembershipSnapshot {
    pub fn insert(&mut self, scope: ScopeId) {
        self.scopes.insert(scope);
    }

    pub fn contains(&self, scope: ScopeId) -> bool {
        self.scopes.contains(&scope)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeId> {
        self.scopes.iter()
    }
}

impl FromIterator<ScopeId> for MembershipSnapshot {
    fn from_iter<T: IntoIterator<Item = ScopeId>>(iter: T) -> Self {
        Self {
            scopes: iter.into_iter().collect(),
        }
    }
}

/// Process-unique id for one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// One live real-time session belonging to one identity.
/// An identity may own several of these at once (multi-device/multi-tab).
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: String,
    pub sender: ConnectionSender,
    pub connected_at: DateTime<Utc>,
}

struct ConnectionEntry {
    handle: Arc<ConnectionHandle>,
    scopes: HashSet<ScopeId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_identity: HashMap<String, HashSet<ConnectionId>>,
    by_scope: HashMap<ScopeId, HashSet<ConnectionId>>,
}

/// The stateful heart of the real-time layer.
///
/// Invariant: a connection id appears in `by_scope[s]` iff `s` is in that
/// connection's entry scopes; it appears in `by_identity[owner]` for exactly
/// as long as its entry exists. Both directions are maintained under the
/// same lock, so readers never observe a connection half-removed.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // A poisoned lock means a panic mid-mutation; nothing to salvage.
        self.inner.lock().expect("connection registry lock poisoned")
    }

    /// Admit a connection: record it under its owner and index it under
    /// every scope in the membership snapshot. Infallible for a well-formed
    /// snapshot.
    pub fn connect(
        &self,
        identity: &str,
        snapshot: MembershipSnapshot,
        sender: ConnectionSender,
    ) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle {
            id,
            identity: identity.to_string(),
            sender,
            connected_at: Utc::now(),
        });

        let scope_count = snapshot.len();
        let mut inner = self.lock();
        for scope in snapshot.iter() {
            inner.by_scope.entry(*scope).or_default().insert(id);
        }
        inner
            .by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(id);
        inner.connections.insert(
            id,
            ConnectionEntry {
                handle: handle.clone(),
                scopes: snapshot.scopes,
            },
        );

        tracing::debug!(
            identity = %identity,
            connection_id = id.0,
            scopes = scope_count,
            "connection registered"
        );

        handle
    }

    /// Remove a connection from every index it participates in. Idempotent:
    /// disconnecting an already-removed handle is a no-op, not an error, so
    /// every termination path (normal close, read/write error, failed send,
    /// forced eviction) can call it without coordination.
    pub fn disconnect(&self, handle: &ConnectionHandle) {
        let mut inner = self.lock();
        let Some(entry) = inner.connections.remove(&handle.id) else {
            return;
        };

        for scope in &entry.scopes {
            if let Some(ids) = inner.by_scope.get_mut(scope) {
                ids.remove(&handle.id);
                if ids.is_empty() {
                    inner.by_scope.remove(scope);
                }
            }
        }
        if let Some(ids) = inner.by_identity.get_mut(&handle.identity) {
            ids.remove(&handle.id);
            if ids.is_empty() {
                inner.by_identity.remove(&handle.identity);
            }
        }

        tracing::debug!(
            identity = %handle.identity,
            connection_id = handle.id.0,
            "connection unregistered"
        );
    }

    /// Grant a scope to every open connection of the named identities.
    /// This is how a DM thread or channel created while its parties are
    /// online becomes reachable without a reconnect. Idempotent; identities
    /// with no open connection are skipped (they pick the scope up from
    /// persistence on their next connect).
    pub fn add_scope<I, S>(&self, identities: I, scope: ScopeId)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.lock();
        for identity in identities {
            let ids: Vec<ConnectionId> = match inner.by_identity.get(identity.as_ref()) {
                Some(ids) => ids.iter().copied().collect(),
                None => continue,
            };
            for id in ids {
                if let Some(entry) = inner.connections.get_mut(&id) {
                    entry.scopes.insert(scope);
                }
                inner.by_scope.entry(scope).or_default().insert(id);
            }
        }
    }

    /// Every currently-registered connection indexed under a scope, at the
    /// moment of the call. Callers send outside the registry lock and treat
    /// a handle that disconnected in between as a prunable delivery failure.
    pub fn members_online(&self, scope: ScopeId) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.lock();
        let Some(ids) = inner.by_scope.get(&scope) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.connections.get(id))
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Whether a given connection is indexed under a scope. Used to guard
    /// inbound frames against scopes the sender does not belong to.
    pub fn is_member(&self, handle: &ConnectionHandle, scope: ScopeId) -> bool {
        let inner = self.lock();
        inner
            .connections
            .get(&handle.id)
            .map(|entry| entry.scopes.contains(&scope))
            .unwrap_or(false)
    }

    /// Whether an identity has at least one open connection.
    pub fn identity_online(&self, identity: &str) -> bool {
        let inner = self.lock();
        inner
            .by_identity
            .get(identity)
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    /// All currently open connections. Used for registry-wide fan-out
    /// (presence events).
    pub fn connections_snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        let inner = self.lock();
        inner
            .connections
            .values()
            .map(|entry| entry.handle.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn sender() -> ConnectionSender {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    fn snapshot(scopes: &[ScopeId]) -> MembershipSnapshot {
        scopes.iter().copied().collect()
    }

    #[test]
    fn connect_indexes_under_every_snapshot_scope() {
        let registry = ConnectionRegistry::new();
        let scopes = [ScopeId::channel(1), ScopeId::dm(42)];
        let handle = registry.connect("alice", snapshot(&scopes), sender());

        for scope in scopes {
            let online = registry.members_online(scope);
            assert_eq!(online.len(), 1, "exactly one connection under {:?}", scope);
            assert_eq!(online[0].id, handle.id);
        }
    }

    #[test]
    fn multiple_connections_per_identity() {
        let registry = ConnectionRegistry::new();
        let scope = ScopeId::channel(1);
        let h1 = registry.connect("alice", snapshot(&[scope]), sender());
        let h2 = registry.connect("alice", snapshot(&[scope]), sender());
        assert_ne!(h1.id, h2.id);

        assert_eq!(registry.members_online(scope).len(), 2);
        assert!(registry.identity_online("alice"));

        // Identity stays online until the last connection is gone.
        registry.disconnect(&h1);
        assert!(registry.identity_online("alice"));
        registry.disconnect(&h2);
        assert!(!registry.identity_online("alice"));
        assert!(registry.members_online(scope).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let scope = ScopeId::dm(7);
        let keep = registry.connect("bob", snapshot(&[scope]), sender());
        let gone = registry.connect("alice", snapshot(&[scope]), sender());

        registry.disconnect(&gone);
        let after_first = registry.members_online(scope);
        registry.disconnect(&gone);
        let after_second = registry.members_online(scope);

        assert_eq!(after_first.len(), 1);
        assert_eq!(after_second.len(), 1);
        assert_eq!(after_second[0].id, keep.id);
    }

    #[test]
    fn add_scope_reaches_online_identities_only() {
        let registry = ConnectionRegistry::new();
        let alice = registry.connect("alice", MembershipSnapshot::default(), sender());
        // bob is not connected

        let scope = ScopeId::dm(42);
        registry.add_scope(["alice", "bob"], scope);

        let online = registry.members_online(scope);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id, alice.id);
        assert!(registry.is_member(&alice, scope));

        // Adding again is a no-op, not a duplicate.
        registry.add_scope(["alice"], scope);
        assert_eq!(registry.members_online(scope).len(), 1);
    }

    #[test]
    fn add_scope_covers_all_connections_of_an_identity() {
        let registry = ConnectionRegistry::new();
        let h1 = registry.connect("alice", MembershipSnapshot::default(), sender());
        let h2 = registry.connect("alice", MembershipSnapshot::default(), sender());

        let scope = ScopeId::channel(3);
        registry.add_scope(["alice"], scope);

        let ids: Vec<_> = registry
            .members_online(scope)
            .iter()
            .map(|h| h.id)
            .collect();
        assert!(ids.contains(&h1.id));
        assert!(ids.contains(&h2.id));
    }

    #[test]
    fn disconnect_cleans_up_scopes_added_mid_session() {
        let registry = ConnectionRegistry::new();
        let handle = registry.connect("alice", snapshot(&[ScopeId::channel(1)]), sender());
        registry.add_scope(["alice"], ScopeId::dm(42));

        registry.disconnect(&handle);
        assert!(registry.members_online(ScopeId::channel(1)).is_empty());
        assert!(registry.members_online(ScopeId::dm(42)).is_empty());
        assert!(!registry.is_member(&handle, ScopeId::dm(42)));
    }

    #[test]
    fn is_member_rejects_foreign_scopes() {
        let registry = ConnectionRegistry::new();
        let handle = registry.connect("alice", snapshot(&[ScopeId::channel(1)]), sender());
        assert!(registry.is_member(&handle, ScopeId::channel(1)));
        assert!(!registry.is_member(&handle, ScopeId::dm(1)));
        assert!(!registry.is_member(&handle, ScopeId::channel(2)));
    }

    /// 100 connects of distinct identities to one scope racing 50
    /// disconnects of a disjoint identity set and a poll loop. Polls must
    /// never surface a disconnected handle or drop a connected one.
    #[test]
    fn concurrent_connect_disconnect_poll() {
        let registry = Arc::new(ConnectionRegistry::new());
        let scope = ScopeId::channel(99);

        // Pre-connect the 50 identities that will be torn down.
        let old_handles: Vec<_> = (0..50)
            .map(|i| registry.connect(&format!("old-{}", i), snapshot(&[scope]), sender()))
            .collect();

        let stop = Arc::new(AtomicBool::new(false));

        let poller = {
            let registry = registry.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let online = registry.members_online(scope);
                    let mut seen = HashSet::new();
                    for handle in &online {
                        assert!(
                            handle.identity.starts_with("old-")
                                || handle.identity.starts_with("new-"),
                            "unexpected identity {}",
                            handle.identity
                        );
                        assert!(seen.insert(handle.id), "duplicate handle in poll result");
                    }
                }
            })
        };

        let connectors: Vec<_> = (0..100)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let handle =
                        registry.connect(&format!("new-{}", i), snapshot(&[scope]), sender());
                    // Once connect has returned the handle must be visible.
                    assert!(registry
                        .members_online(scope)
                        .iter()
                        .any(|h| h.id == handle.id));
                })
            })
            .collect();

        let disconnectors: Vec<_> = old_handles
            .into_iter()
            .map(|handle| {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry.disconnect(&handle);
                    // Once disconnect has returned the handle must be gone.
                    assert!(!registry
                        .members_online(scope)
                        .iter()
                        .any(|h| h.id == handle.id));
                })
            })
            .collect();

        for t in connectors {
            t.join().unwrap();
        }
        for t in disconnectors {
            t.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        poller.join().unwrap();

        let online = registry.members_online(scope);
        assert_eq!(online.len(), 100);
        assert!(online.iter().all(|h| h.identity.starts_with("new-")));
    }
}
