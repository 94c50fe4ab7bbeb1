//! Account registration and token minting.
//!
//! These are collaborator surfaces for the real-time core: the core consumes
//! tokens, it never mints them. There is deliberately no credential check
//! beyond account existence — password policy lives outside this system.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AccountRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// POST /api/register — Create an account and mint its first token.
/// Body: { "username": "..." }. 409 if the username is taken.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<AccountRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), StatusCode> {
    let username = body.username.trim().to_string();
    if username.is_empty() || username.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let uname = username.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO users (username, created_at) VALUES (?1, ?2)",
                rusqlite::params![uname, Utc::now().to_rfc3339()],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if inserted == 0 {
            return Err(StatusCode::CONFLICT);
        }
        Ok(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let access_token = token::issue_token(&state.jwt_secret, &username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(username = %username, "Account registered");
    Ok((StatusCode::CREATED, Json(TokenResponse { access_token })))
}

/// POST /api/login — Mint a token for an existing account.
/// Body: { "username": "..." }. 401 for unknown accounts.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<AccountRequest>,
) -> Result<Json<TokenResponse>, StatusCode> {
    let db = state.db.clone();
    let username = body.username.clone();
    let exists = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            rusqlite::params![username],
            |row| row.get::<_, bool>(0),
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if !exists {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let access_token = token::issue_token(&state.jwt_secret, &body.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(TokenResponse { access_token }))
}
