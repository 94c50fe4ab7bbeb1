//! REST endpoints for direct-message threads.
//!
//! Creating a DM is the canonical route-triggered mutation: after the thread
//! is durably persisted, both participants' live connections are granted the
//! new scope and notified — no reconnect required.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::broadcast::Envelope;
use crate::notify;
use crate::registry::ScopeId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDmRequest {
    /// Username of the other participant
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct DmResponse {
    pub id: i64,
    pub user_a: String,
    pub user_b: String,
    pub created_at: String,
}

/// POST /api/dms — Create a DM thread between the caller and another user.
/// Bearer auth required. Body: { "username": "..." }.
/// 404 unknown peer, 409 if a thread for this pair already exists.
pub async fn create_dm(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateDmRequest>,
) -> Result<(StatusCode, Json<DmResponse>), StatusCode> {
    let me = claims.username.clone();
    let peer = body.username.clone();

    if me == peer {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let (me_db, peer_db) = (me.clone(), peer.clone());
    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Validate the peer exists
        let peer_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
                rusqlite::params![peer_db],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !peer_exists {
            return Err(StatusCode::NOT_FOUND);
        }

        // Normalize participant order: lexicographically smaller username
        // is user_a, so a pair can never create two rows.
        let (user_a, user_b) = if me_db < peer_db {
            (me_db.clone(), peer_db.clone())
        } else {
            (peer_db.clone(), me_db.clone())
        };

        let already: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM dms WHERE user_a = ?1 AND user_b = ?2)",
                rusqlite::params![user_a, user_b],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if already {
            return Err(StatusCode::CONFLICT);
        }

        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO dms (user_a, user_b, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_a, user_b, created_at],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(DmResponse {
            id: conn.last_insert_rowid(),
            user_a,
            user_b,
            created_at,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    // Bridge to the real-time layer: already-connected participants gain
    // the new scope and hear about it immediately.
    let scope = ScopeId::dm(response.id);
    let envelope = Envelope::notification(
        &me,
        scope,
        serde_json::json!({"type": "newdm", "sender": me, "receiver": peer, "dm_id": response.id}),
    );
    notify::notify(&state.registry, [me.as_str(), peer.as_str()], &envelope);

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/dms — List the caller's DM threads.
pub async fn list_dms(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<DmResponse>>, StatusCode> {
    let db = state.db.clone();
    let username = claims.username.clone();

    let dms = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_a, user_b, created_at FROM dms
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY created_at DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let dms: Vec<DmResponse> = stmt
            .query_map(rusqlite::params![username], |row| {
                Ok(DmResponse {
                    id: row.get(0)?,
                    user_a: row.get(1)?,
                    user_b: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(dms)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(dms))
}
