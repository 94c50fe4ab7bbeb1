//! REST endpoints for group channels.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::broadcast::Envelope;
use crate::notify;
use crate::registry::ScopeId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// POST /api/channels — Create a channel; the creator becomes its first
/// member. Bearer auth required. 409 if the name is taken.
pub async fn create_channel(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelResponse>), StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let creator = claims.username.clone();
    let (creator_db, name_db) = (creator.clone(), name.clone());
    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let created_at = Utc::now().to_rfc3339();

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO channels (name, created_at) VALUES (?1, ?2)",
                rusqlite::params![name_db, created_at],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if inserted == 0 {
            return Err(StatusCode::CONFLICT);
        }
        let id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO channel_members (channel_id, username, joined_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, creator_db, created_at],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(ChannelResponse {
            id,
            name: name_db,
            created_at,
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let scope = ScopeId::channel(response.id);
    let envelope = Envelope::notification(
        &creator,
        scope,
        serde_json::json!({"type": "newchannel", "channel_id": response.id, "name": response.name}),
    );
    notify::notify(&state.registry, [creator.as_str()], &envelope);

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/channels/{id}/join — Join a channel. Bearer auth required.
/// Idempotent: joining a channel you are already in returns 200.
/// All online members, the joiner included, get a `joined` notification.
pub async fn join_channel(
    State(state): State<AppState>,
    claims: Claims,
    Path(channel_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let username = claims.username.clone();
    let uname_db = username.clone();
    let newly_joined = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM channels WHERE id = ?1)",
                rusqlite::params![channel_id],
                |row| row.get(0),
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if !exists {
            return Err(StatusCode::NOT_FOUND);
        }

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, username, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, uname_db, Utc::now().to_rfc3339()],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok(inserted > 0)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if newly_joined {
        let scope = ScopeId::channel(channel_id);
        let envelope = Envelope::notification(
            &username,
            scope,
            serde_json::json!({"type": "joined", "channel_id": channel_id, "username": username}),
        );
        notify::notify(&state.registry, [username.as_str()], &envelope);
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::OK)
    }
}

/// GET /api/channels — List all channels.
pub async fn list_channels(
    State(state): State<AppState>,
    _claims: Claims,
) -> Result<Json<Vec<ChannelResponse>>, StatusCode> {
    let db = state.db.clone();
    let channels = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare("SELECT id, name, created_at FROM channels ORDER BY created_at")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let channels: Vec<ChannelResponse> = stmt
            .query_map([], |row| {
                Ok(ChannelResponse {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(channels)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(channels))
}
