use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub node: NodeConfig,
    pub tokens: TokenSettings,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub discovery: DiscoveryConfig,
    /// Mapping of request host to target cluster; hosts not listed fall back
    /// to `name`.
    pub host_clusters: BTreeMap<String, String>,
    pub name: String,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// DNS name to resolve for peer discovery (required for dns strategy)
    pub dns_name: Option<String>,
    /// How often to poll for peer changes (seconds)
    pub poll_interval_seconds: u64,
    /// Discovery strategy: "dns" or "static"
    pub strategy: DiscoveryStrategy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DiscoveryStrategy {
    Dns,
    #[default]
    Static,
}

/// Registry behavior knobs, shared with the `Registry` itself.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub admin_users: BTreeSet<String>,
    /// Bound on the `previous` history chain kept per token.
    pub history_length: usize,
    /// Mapping of request host to the token it resolves to, for hostless GETs.
    pub host_tokens: BTreeMap<String, String>,
    /// Per-owner cap on live tokens; unlimited when absent.
    pub owner_quota: Option<usize>,
    pub reserved_tokens: BTreeSet<String>,
    /// Root recorded on tokens created here, unless inherited or supplied.
    pub root: String,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            admin_users: BTreeSet::new(),
            history_length: 5,
            host_tokens: BTreeMap::new(),
            owner_quota: None,
            reserved_tokens: ["localhost".to_string()].into_iter().collect(),
            root: "local".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dns_name: None,
            poll_interval_seconds: 5,
            strategy: DiscoveryStrategy::Static,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            host_clusters: BTreeMap::new(),
            name: "local".to_string(),
            peers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node_id = std::env::var("NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let peers: Vec<String> = std::env::var("PEERS")
            .map(|p| {
                p.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let dns_name = std::env::var("DISCOVERY_DNS_NAME").ok();
        let discovery_strategy = if dns_name.is_some() {
            DiscoveryStrategy::Dns
        } else {
            std::env::var("DISCOVERY_STRATEGY")
                .ok()
                .map(|s| match s.to_lowercase().as_str() {
                    "dns" => DiscoveryStrategy::Dns,
                    _ => DiscoveryStrategy::Static,
                })
                .unwrap_or(DiscoveryStrategy::Static)
        };
        let poll_interval = std::env::var("DISCOVERY_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let cluster_name = std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "local".to_string());

        let history_length = std::env::var("TOKEN_HISTORY_LENGTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let owner_quota = std::env::var("TOKEN_OWNER_QUOTA")
            .ok()
            .and_then(|s| s.parse().ok());

        let admin_users = parse_set(std::env::var("ADMIN_USERS").ok().as_deref());

        let host_tokens = parse_map(std::env::var("HOST_TOKENS").ok().as_deref());
        let host_clusters = parse_map(std::env::var("HOST_CLUSTERS").ok().as_deref());

        let mut reserved_tokens = parse_set(std::env::var("RESERVED_TOKENS").ok().as_deref());
        reserved_tokens.insert("localhost".to_string());
        // Hosts that resolve to a token must never themselves be token names.
        reserved_tokens.extend(host_tokens.keys().cloned());

        let root = std::env::var("GLOBAL_ROOT").unwrap_or_else(|_| cluster_name.clone());

        let config = Config {
            cluster: ClusterConfig {
                discovery: DiscoveryConfig {
                    dns_name,
                    poll_interval_seconds: poll_interval,
                    strategy: discovery_strategy,
                },
                host_clusters,
                name: cluster_name,
                peers,
            },
            node: NodeConfig {
                bind_address,
                data_dir,
                id: node_id,
            },
            tokens: TokenSettings {
                admin_users,
                history_length,
                host_tokens,
                owner_quota,
                reserved_tokens,
                root,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "NODE_ID cannot be empty".to_string(),
            ));
        }
        if self.tokens.history_length == 0 {
            return Err(ConfigError::ValidationError(
                "TOKEN_HISTORY_LENGTH must be at least 1".to_string(),
            ));
        }
        if self.tokens.owner_quota == Some(0) {
            return Err(ConfigError::ValidationError(
                "TOKEN_OWNER_QUOTA must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if running without sibling replicas (no peer refresh fan-out).
    pub fn is_single_node(&self) -> bool {
        self.cluster.peers.is_empty() && self.cluster.discovery.dns_name.is_none()
    }
}

/// Comma-separated list into a set.
fn parse_set(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Comma-separated `key=value` pairs into a map.
fn parse_map(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.map(|value| {
        value
            .split(',')
            .filter_map(|pair| {
                let (key, val) = pair.split_once('=')?;
                let (key, val) = (key.trim(), val.trim());
                if key.is_empty() || val.is_empty() {
                    None
                } else {
                    Some((key.to_string(), val.to_string()))
                }
            })
            .collect()
    })
    .unwrap_or_default()
}
