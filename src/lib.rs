//! token-registry - the token registry of the fleet router
//!
//! A token is a named, owner-scoped handle for a service description. This
//! crate provides:
//! - Durable token records with bounded update history
//! - An owner index (directory + per-owner shards) for enumeration and quota
//! - Optimistic concurrency via deterministic content hashes (ETags)
//! - Soft and hard deletion with administrative gating
//! - A gap-free re-index rebuild
//! - Best-effort peer cache refresh across sibling replicas
//! - REST API

pub mod api;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod kv;
pub mod registry;
#[cfg(test)]
pub mod testutil;

use tokio::sync::RwLock;

use cluster::ClusterCalculator;
use config::Config;
use registry::Registry;

/// Shared application state
pub struct AppState {
    pub clusters: ClusterCalculator,
    pub config: Config,
    pub http_client: reqwest::Client,
    /// Sibling replica addresses, kept current by the discovery task.
    pub peers: RwLock<Vec<String>>,
    pub registry: Registry,
}
