use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::{resolver, token, AuthError};
use crate::state::AppState;
use crate::ws::{actor, CLOSE_POLICY_VIOLATION};

/// Query parameters for WebSocket connection. Auth is via ?token=JWT —
/// browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    /// Absent token is an auth failure, not a malformed request: the
    /// client still gets the policy-violation close, never a hung socket.
    pub token: Option<String>,
}

/// GET /ws?token=JWT
/// Connection-admission entry point. Verifies the bearer token, resolves
/// the claimed identity against persistence, and either spawns the
/// connection actor or closes with a policy-violation signal. Registration
/// happens only after both auth steps, so a handshake the client aborts
/// can never leak a half-registered connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Verify token integrity and extract the claimed username. Synchronous
    // local check — an absent or invalid token fails here, it never hangs.
    let Some(presented) = params.token else {
        return refuse(ws, AuthError::MalformedToken);
    };
    let username = match token::verify_token(&state.jwt_secret, &presented) {
        Ok(username) => username,
        Err(err) => return refuse(ws, err),
    };

    // Resolve the identity and load its membership snapshot from
    // persistence. rusqlite is synchronous, so off the async thread.
    let db = state.db.clone();
    let claimed = username.clone();
    let resolved = tokio::task::spawn_blocking(move || resolver::resolve(&db, &claimed)).await;

    match resolved {
        Ok(Ok(snapshot)) => {
            tracing::info!(
                username = %username,
                scopes = snapshot.len(),
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, username, snapshot))
        }
        Ok(Err(err)) => refuse(ws, err),
        Err(join_err) => refuse(ws, AuthError::Persistence(join_err.to_string())),
    }
}

/// Refuse admission: upgrade the connection, then immediately close it with
/// the policy-violation code. The cause is logged server-side only — every
/// failure looks identical to the client.
fn refuse(ws: WebSocketUpgrade, err: AuthError) -> Response {
    tracing::warn!(error = %err, "WebSocket auth failed");

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "policy violation".into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
