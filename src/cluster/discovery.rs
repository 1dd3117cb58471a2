//! Peer enumeration for the refresh fan-out.
//!
//! Two strategies cover the deployments we run:
//!
//! - **Static**: a fixed list of peer addresses from configuration.
//! - **DNS**: resolve one name to all replica addresses. Works with Docker
//!   Compose service names and Kubernetes headless services.
//!
//! Discovered peers are plain `host:port` strings fed to the broadcast; the
//! local replica is filtered out of DNS results so it never refreshes itself
//! over the network.

use std::net::{IpAddr, ToSocketAddrs};

use tracing::{trace, warn};

pub enum Discovery {
    Dns(DnsPoll),
    Static(StaticList),
}

impl Discovery {
    pub async fn discover_peers(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Discovery::Dns(d) => d.discover().await,
            Discovery::Static(d) => Ok(d.peer_addrs.clone()),
        }
    }
}

pub struct DnsPoll {
    dns_name: String,
    local_ip: Option<IpAddr>,
    port: u16,
}

impl DnsPoll {
    pub fn new(dns_name: String, port: u16) -> Self {
        let local_ip = detect_local_ip();
        if local_ip.is_none() {
            warn!(dns_name = %dns_name, "Could not detect local IP; DNS discovery may include self");
        }
        Self {
            dns_name,
            local_ip,
            port,
        }
    }

    async fn discover(&self) -> anyhow::Result<Vec<String>> {
        let lookup = format!("{}:{}", self.dns_name, self.port);

        let peers: Vec<String> = tokio::net::lookup_host(&lookup)
            .await?
            .filter(|addr| self.local_ip.map(|ip| addr.ip() != ip).unwrap_or(true))
            .map(|addr| addr.to_string())
            .collect();

        trace!(dns = %self.dns_name, peers = peers.len(), "DNS discovery completed");
        Ok(peers)
    }
}

pub struct StaticList {
    peer_addrs: Vec<String>,
}

impl StaticList {
    pub fn new(peer_addrs: Vec<String>) -> Self {
        Self { peer_addrs }
    }
}

/// Detect the local IP address of this replica, used to filter self out of
/// DNS discovery results. Tries the HOSTNAME env var (set by Docker and
/// Kubernetes), then a routing-table query via a connected UDP socket (no
/// packet is sent).
fn detect_local_ip() -> Option<IpAddr> {
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if let Ok(addrs) = (hostname.as_str(), 0u16).to_socket_addrs() {
            for addr in addrs {
                if !addr.ip().is_loopback() {
                    return Some(addr.ip());
                }
            }
        }
    }

    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}
