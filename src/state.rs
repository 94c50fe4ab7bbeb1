use std::sync::Arc;

use crate::db::DbPool;
use crate::presence::PresenceMap;
use crate::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Connection registry: live connections indexed by identity and scope
    pub registry: Arc<ConnectionRegistry>,
    /// In-memory presence tracking: username -> last announced status
    pub presence: PresenceMap,
}
