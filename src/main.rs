use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use token_registry::auth::PlatformAuthorizer;
use token_registry::cluster::discovery::{DnsPoll, StaticList};
use token_registry::cluster::Discovery;
use token_registry::config::{Config, DiscoveryStrategy};
use token_registry::kv::{CachedKv, KvStore, RedbKv};
use token_registry::registry::{Registry, SystemClock};
use token_registry::{api, cluster, AppState};
use tokio::sync::RwLock;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "token-registry starting");

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration for node: {}", config.node.id);

    // Open the durable store and layer the read-through cache over it
    let backing: Arc<dyn KvStore> = Arc::new(RedbKv::open(&config.node.data_dir)?);
    let kv: Arc<dyn KvStore> = Arc::new(CachedKv::new(backing));
    info!("Store opened at: {}", config.node.data_dir);

    let registry = Registry::new(
        kv,
        Arc::new(PlatformAuthorizer::new(config.tokens.admin_users.clone())),
        Arc::new(SystemClock),
        config.tokens.clone(),
    );

    // Build discovery strategy
    let discovery = build_discovery(&config);

    // Shared HTTP client for the peer refresh fan-out
    let http_client = reqwest::Client::builder()
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .pool_max_idle_per_host(2)
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let clusters = cluster::ClusterCalculator::new(
        config.cluster.name.clone(),
        config.cluster.host_clusters.clone(),
    );

    // Create shared state
    let state = Arc::new(AppState {
        clusters,
        config: config.clone(),
        http_client,
        peers: RwLock::new(Vec::new()),
        registry,
    });

    // Run initial peer discovery before serving traffic
    if let Some(ref disc) = discovery {
        match disc.discover_peers().await {
            Ok(peers) => {
                info!("Initial discovery found {} peer(s)", peers.len());
                *state.peers.write().await = peers;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Initial peer discovery failed (will retry in background)");
            }
        }
    }

    let discovery_handle =
        discovery.map(|disc| cluster::start_discovery_task(Arc::clone(&state), disc));
    if discovery_handle.is_none() {
        info!("Running in single-replica mode (no peers configured)");
    }

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down background tasks");
    if let Some(handle) = discovery_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

/// Build the appropriate discovery strategy from configuration
fn build_discovery(config: &Config) -> Option<Discovery> {
    if config.is_single_node() {
        return None;
    }

    match config.cluster.discovery.strategy {
        DiscoveryStrategy::Dns => {
            let dns_name = config
                .cluster
                .discovery
                .dns_name
                .clone()
                .expect("dns_name is required when discovery strategy is 'dns'");
            let port = config
                .node
                .bind_address
                .rsplit(':')
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080u16);
            Some(Discovery::Dns(DnsPoll::new(dns_name, port)))
        }
        DiscoveryStrategy::Static => {
            if config.cluster.peers.is_empty() {
                None
            } else {
                Some(Discovery::Static(StaticList::new(
                    config.cluster.peers.clone(),
                )))
            }
        }
    }
}
