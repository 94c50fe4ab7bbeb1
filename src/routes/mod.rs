pub mod accounts;
pub mod channels;
pub mod dms;

use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Account routes (no auth required — registration and token minting)
    let account_routes = Router::new()
        .route("/api/register", axum::routing::post(accounts::register))
        .route("/api/login", axum::routing::post(accounts::login));

    // Authenticated routes (bearer token required — Claims extractor validates)
    let dm_routes = Router::new()
        .route("/api/dms", axum::routing::post(dms::create_dm))
        .route("/api/dms", axum::routing::get(dms::list_dms));
    let channel_routes = Router::new()
        .route("/api/channels", axum::routing::post(channels::create_channel))
        .route("/api/channels", axum::routing::get(channels::list_channels))
        .route(
            "/api/channels/{id}/join",
            axum::routing::post(channels::join_channel),
        );

    // WebSocket endpoint (auth via query param, not bearer header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(account_routes)
        .merge(dm_routes)
        .merge(channel_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
