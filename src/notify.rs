//! Bridge from request handling to the real-time layer.
//!
//! After a route durably persists a membership-creating mutation (new DM
//! thread, new channel member), it calls [`notify`] so that parties who are
//! already connected start receiving traffic on the new scope immediately,
//! without a reconnect. Offline parties pick the scope up from persistence
//! on their next connect.

use crate::broadcast::{self, Envelope};
use crate::registry::ConnectionRegistry;

/// Register the envelope's target scope for every participant with open
/// connections, then fan the envelope out to the scope's online members.
///
/// Route-triggered notifications always include the acting identity: the
/// actor's other devices learn about the mutation the same way everyone
/// else does.
pub fn notify<I, S>(registry: &ConnectionRegistry, participants: I, envelope: &Envelope) -> usize
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(scope) = envelope.scope {
        registry.add_scope(participants, scope);
    }
    broadcast::deliver(registry, envelope, false)
}
