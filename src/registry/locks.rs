//! Named critical sections for index-affecting mutations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Every token mutation and the re-index serialize on this name; reads never
/// take it. The lock table is process-local, so cross-replica conflicts are
/// left to the optimistic version hashes.
pub const TOKEN_LOCK: &str = "TOKEN_LOCK";

/// Map of named mutual-exclusion primitives, created lazily under a guard.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn named(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Run `f` while holding the named lock. The critical section itself is
    /// synchronous; the guard drops on every exit path, panics included.
    pub async fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.named(name);
        let _guard = lock.lock().await;
        f()
    }
}
