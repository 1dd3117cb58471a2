//! Peer cache refresh: the gossip that keeps replica caches coherent.
//!
//! After a committed mutation the originating replica broadcasts a small
//! payload naming what changed; recipients re-read that state from the KV
//! with the cache bypassed. The broadcast is best-effort by design — a peer
//! that misses it serves stale reads until the next refresh, and conflicting
//! writes are still fenced by the version hashes.

use serde::{Deserialize, Serialize};

use crate::kv::KvStore;
use crate::registry::index::load_directory;
use crate::registry::RegistryError;
use crate::AppState;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RefreshPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl RefreshPayload {
    pub fn for_index() -> Self {
        Self {
            index: Some(true),
            ..Self::default()
        }
    }

    pub fn for_token(token: String, owner: Option<String>) -> Self {
        Self {
            owner,
            token: Some(token),
            ..Self::default()
        }
    }
}

/// Apply an inbound refresh: pull the named state from the authoritative
/// store, repopulating this replica's cache on the way.
pub fn apply(kv: &dyn KvStore, payload: &RefreshPayload) -> Result<(), RegistryError> {
    if payload.index.unwrap_or(false) {
        let directory = load_directory(kv, true)?;
        for shard_key in directory.values() {
            kv.fetch(shard_key, true)?;
        }
        tracing::debug!(shards = directory.len(), "Refreshed owner index");
    }

    if let Some(token) = &payload.token {
        kv.fetch(token, true)?;
        if let Some(owner) = &payload.owner {
            let directory = load_directory(kv, true)?;
            if let Some(shard_key) = directory.get(owner) {
                kv.fetch(shard_key, true)?;
            }
        }
        tracing::debug!(token = %token, "Refreshed token");
    }

    Ok(())
}

/// Broadcast a refresh to every known peer. Failures are logged and
/// swallowed; the originating operation has already committed.
pub async fn broadcast(state: &AppState, payload: RefreshPayload) {
    let peers = state.peers.read().await.clone();
    if peers.is_empty() {
        return;
    }

    let sends = peers.into_iter().map(|peer| {
        let client = state.http_client.clone();
        let payload = payload.clone();
        async move {
            let url = format!("http://{peer}/tokens/refresh");
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(peer = %peer, "Peer refresh delivered");
                }
                Ok(response) => {
                    tracing::warn!(peer = %peer, status = %response.status(), "Peer refresh rejected");
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Peer refresh failed");
                }
            }
        }
    });

    futures_util::future::join_all(sends).await;
}
