use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_internal/health", get(handlers::health))
        .route("/token", delete(handlers::delete_token))
        .route("/token", get(handlers::get_token))
        .route("/token", post(handlers::post_token))
        .route("/token-owners", get(handlers::token_owners))
        .route("/tokens", get(handlers::list_tokens))
        .route("/tokens/refresh", post(handlers::peer_refresh))
        .route("/tokens/reindex", post(handlers::reindex))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
