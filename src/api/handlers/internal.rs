use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson};
use crate::cluster::refresh::{self, RefreshPayload};
use crate::registry::RegistryError;
use crate::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "node-id": state.config.node.id,
        "status": "healthy",
    }))
}

/// Peer-only endpoint: a sibling replica committed a mutation and asks us to
/// drop our cached view of it.
pub async fn peer_refresh(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<RefreshPayload>,
) -> Result<Json<Value>, ApiError> {
    refresh::apply(state.registry.kv.as_ref(), &payload)?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReindexRequest {
    /// Token names to index; when absent the store's own lister supplies
    /// them.
    #[serde(default)]
    pub tokens: Option<Vec<String>>,
}

/// Operator endpoint: rebuild the owner directory and every shard, then tell
/// the peers to re-read the index.
pub async fn reindex(
    State(state): State<Arc<AppState>>,
    body: Option<AppJson<ReindexRequest>>,
) -> Result<Json<Value>, ApiError> {
    let tokens = match body.and_then(|AppJson(request)| request.tokens) {
        Some(tokens) => tokens,
        None => state
            .registry
            .kv
            .token_names()
            .map_err(RegistryError::from)?,
    };

    let summary = state.registry.reindex(tokens).await?;
    refresh::broadcast(&state, RefreshPayload::for_index()).await;

    Ok(Json(json!({
        "message": format!("Successfully re-indexed {} tokens", summary.tokens),
        "owners": summary.owners,
        "tokens": summary.tokens,
    })))
}
