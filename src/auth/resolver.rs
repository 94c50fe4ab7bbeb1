//! Identity resolution against the persistence collaborator.
//!
//! Confirms a claimed username corresponds to a real account and loads that
//! account's current scope memberships (channel ids and DM thread ids) as a
//! point-in-time snapshot. Read-only; call sites run it inside
//! `tokio::task::spawn_blocking` because rusqlite is synchronous.

use crate::auth::AuthError;
use crate::db::DbPool;
use crate::registry::{MembershipSnapshot, ScopeId};

/// Resolve a claimed identity to its membership snapshot.
///
/// Fails with `AuthError::UnknownIdentity` when no such account exists.
/// The snapshot is whatever persistence held at the moment of the read;
/// scopes created afterwards reach live connections via the registry's
/// `add_scope`, not through re-resolution.
pub fn resolve(db: &DbPool, username: &str) -> Result<MembershipSnapshot, AuthError> {
    let conn = db
        .lock()
        .map_err(|e| AuthError::Persistence(format!("DB lock error: {}", e)))?;

    let exists: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            rusqlite::params![username],
            |row| row.get(0),
        )
        .map_err(|e| AuthError::Persistence(e.to_string()))?;

    if !exists {
        return Err(AuthError::UnknownIdentity);
    }

    let mut snapshot = MembershipSnapshot::default();

    let mut stmt = conn
        .prepare("SELECT channel_id FROM channel_members WHERE username = ?1")
        .map_err(|e| AuthError::Persistence(e.to_string()))?;
    let channels = stmt
        .query_map(rusqlite::params![username], |row| row.get::<_, i64>(0))
        .map_err(|e| AuthError::Persistence(e.to_string()))?;
    for id in channels.flatten() {
        snapshot.insert(ScopeId::channel(id));
    }

    let mut stmt = conn
        .prepare("SELECT id FROM dms WHERE user_a = ?1 OR user_b = ?1")
        .map_err(|e| AuthError::Persistence(e.to_string()))?;
    let dms = stmt
        .query_map(rusqlite::params![username], |row| row.get::<_, i64>(0))
        .map_err(|e| AuthError::Persistence(e.to_string()))?;
    for id in dms.flatten() {
        snapshot.insert(ScopeId::dm(id));
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;

    fn seed(db: &DbPool) {
        let conn = db.lock().unwrap();
        conn.execute_batch(
            "INSERT INTO users (username, created_at) VALUES ('alice', '2026-01-01'), ('bob', '2026-01-01');
             INSERT INTO channels (id, name, created_at) VALUES (1, 'general', '2026-01-01');
             INSERT INTO channel_members (channel_id, username, joined_at) VALUES (1, 'alice', '2026-01-01');
             INSERT INTO dms (id, user_a, user_b, created_at) VALUES (42, 'alice', 'bob', '2026-01-01');",
        )
        .unwrap();
    }

    #[test]
    fn resolve_loads_channel_and_dm_scopes() {
        let db = init_db_in_memory().unwrap();
        seed(&db);

        let snapshot = resolve(&db, "alice").unwrap();
        assert!(snapshot.contains(ScopeId::channel(1)));
        assert!(snapshot.contains(ScopeId::dm(42)));
        assert_eq!(snapshot.len(), 2);

        // bob is in the DM but not the channel
        let snapshot = resolve(&db, "bob").unwrap();
        assert!(!snapshot.contains(ScopeId::channel(1)));
        assert!(snapshot.contains(ScopeId::dm(42)));
    }

    #[test]
    fn unknown_identity_is_refused() {
        let db = init_db_in_memory().unwrap();
        seed(&db);

        let err = resolve(&db, "mallory").unwrap_err();
        assert!(matches!(err, AuthError::UnknownIdentity));
    }

    #[test]
    fn channel_and_dm_id_spaces_do_not_collide() {
        let db = init_db_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO users (username, created_at) VALUES ('alice', '2026-01-01'), ('bob', '2026-01-01');
                 INSERT INTO channels (id, name, created_at) VALUES (7, 'general', '2026-01-01');
                 INSERT INTO channel_members (channel_id, username, joined_at) VALUES (7, 'alice', '2026-01-01');
                 INSERT INTO dms (id, user_a, user_b, created_at) VALUES (7, 'alice', 'bob', '2026-01-01');",
            )
            .unwrap();
        }

        // Same numeric id, two distinct scopes after tagging.
        let snapshot = resolve(&db, "alice").unwrap();
        assert_eq!(snapshot.len(), 2);
    }
}
