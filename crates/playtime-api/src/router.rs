//! Axum router construction for the query API.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /` -- online count and identifiers
/// - `GET /{steam_id}` -- single player
///
/// CORS allows any origin so browser dashboards can poll the API.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/{steam_id}", get(handlers::get_player))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
