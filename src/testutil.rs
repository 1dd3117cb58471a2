//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::auth::PlatformAuthorizer;
use crate::config::TokenSettings;
use crate::kv::{CachedKv, KvStore, MemoryKv};
use crate::registry::{Clock, Registry, TokenRecord, UpdateMode, WriteRequest};

/// Deterministic clock: starts at a fixed epoch and ticks forward one
/// millisecond per reading, so successive writes get distinct, increasing
/// stamps.
pub struct TickClock(AtomicI64);

impl TickClock {
    pub fn new(start_ms: i64) -> Self {
        Self(AtomicI64::new(start_ms))
    }
}

impl Clock for TickClock {
    fn now_ms(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

pub fn test_settings() -> TokenSettings {
    TokenSettings {
        admin_users: ["admin".to_string()].into_iter().collect(),
        ..TokenSettings::default()
    }
}

/// Registry over a cached in-memory store, with `admin` as administrator.
pub fn setup_registry() -> Registry {
    setup_registry_with(|_| {})
}

pub fn setup_registry_with(configure: impl FnOnce(&mut TokenSettings)) -> Registry {
    let mut settings = test_settings();
    configure(&mut settings);
    let backing: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let kv: Arc<dyn KvStore> = Arc::new(CachedKv::new(backing));
    Registry::new(
        kv,
        Arc::new(PlatformAuthorizer::new(settings.admin_users.clone())),
        Arc::new(TickClock::new(1_700_000_000_000)),
        settings,
    )
}

/// Normal-mode write request attributed to `user`.
pub fn write_req(token: &str, user: &str, body: Value) -> WriteRequest {
    WriteRequest {
        auth_user: user.to_string(),
        cluster: "test-cluster".to_string(),
        if_match: None,
        mode: UpdateMode::Normal,
        record: TokenRecord::from_value(&body).unwrap(),
        token: token.to_string(),
    }
}

/// Admin-mode write request attributed to the `admin` user.
pub fn admin_req(token: &str, body: Value) -> WriteRequest {
    WriteRequest {
        mode: UpdateMode::Admin,
        ..write_req(token, "admin", body)
    }
}

/// Create a token as its owner.
pub async fn seed_token(registry: &Registry, token: &str, body: Value) {
    let owner = body
        .get("owner")
        .and_then(Value::as_str)
        .unwrap_or("alice")
        .to_string();
    registry
        .create_or_update(write_req(token, &owner, body))
        .await
        .unwrap();
}
