use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::{KvError, KvStore};

/// Read-through cache over another store.
///
/// Plain fetches are served from the cache when possible; `refresh = true`
/// bypasses it and repopulates from the authoritative store. Stores and
/// deletes write through, so this replica always reads its own writes. Peer
/// replicas invalidate us via the `tokens/refresh` endpoint, which fetches
/// with `refresh = true`.
pub struct CachedKv {
    cache: RwLock<HashMap<String, Value>>,
    inner: Arc<dyn KvStore>,
}

impl CachedKv {
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            inner,
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        match self.cache.read() {
            Ok(cache) => cache.get(key).cloned(),
            Err(_) => None,
        }
    }

    fn remember(&self, key: &str, value: Option<&Value>) {
        if let Ok(mut cache) = self.cache.write() {
            match value {
                Some(v) => {
                    cache.insert(key.to_string(), v.clone());
                }
                None => {
                    cache.remove(key);
                }
            }
        }
    }
}

impl KvStore for CachedKv {
    fn delete(&self, key: &str) -> Result<(), KvError> {
        self.inner.delete(key)?;
        self.remember(key, None);
        Ok(())
    }

    fn fetch(&self, key: &str, refresh: bool) -> Result<Option<Value>, KvError> {
        if !refresh {
            if let Some(value) = self.cached(key) {
                return Ok(Some(value));
            }
        }

        let value = self.inner.fetch(key, refresh)?;
        self.remember(key, value.as_ref());
        Ok(value)
    }

    fn store(&self, key: &str, value: &Value) -> Result<(), KvError> {
        self.inner.store(key, value)?;
        self.remember(key, Some(value));
        Ok(())
    }

    fn token_names(&self) -> Result<Vec<String>, KvError> {
        self.inner.token_names()
    }
}
