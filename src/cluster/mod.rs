pub mod discovery;
pub mod refresh;

pub use discovery::Discovery;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::AppState;

/// Resolves the target cluster for a request from its host header. The
/// host-to-cluster map is static, loaded at boot; unlisted hosts land on the
/// default cluster.
#[derive(Clone, Debug)]
pub struct ClusterCalculator {
    default_cluster: String,
    host_clusters: BTreeMap<String, String>,
}

impl ClusterCalculator {
    pub fn new(default_cluster: String, host_clusters: BTreeMap<String, String>) -> Self {
        Self {
            default_cluster,
            host_clusters,
        }
    }

    pub fn calculate(&self, host: Option<&str>) -> String {
        host.map(strip_port)
            .and_then(|h| self.host_clusters.get(h))
            .cloned()
            .unwrap_or_else(|| self.default_cluster.clone())
    }
}

fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

/// Background task that keeps the peer set current via the configured
/// discovery strategy.
pub fn start_discovery_task(state: Arc<AppState>, discovery: Discovery) -> JoinHandle<()> {
    let poll_interval = Duration::from_secs(state.config.cluster.discovery.poll_interval_seconds);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);

        loop {
            interval.tick().await;

            match discovery.discover_peers().await {
                Ok(peers) => {
                    *state.peers.write().await = peers;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Peer discovery failed");
                }
            }
        }
    })
}
