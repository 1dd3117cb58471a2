use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use super::store::INDEX_KEY_PREFIX;
use super::{KvError, KvStore};

/// In-memory store. The KV seam for unit and integration tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn delete(&self, key: &str) -> Result<(), KvError> {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
        Ok(())
    }

    fn fetch(&self, key: &str, _refresh: bool) -> Result<Option<Value>, KvError> {
        match self.entries.read() {
            Ok(entries) => Ok(entries.get(key).cloned()),
            Err(_) => Ok(None),
        }
    }

    fn store(&self, key: &str, value: &Value) -> Result<(), KvError> {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.clone());
        }
        Ok(())
    }

    fn token_names(&self) -> Result<Vec<String>, KvError> {
        match self.entries.read() {
            Ok(entries) => Ok(entries
                .keys()
                .filter(|k| !k.starts_with(INDEX_KEY_PREFIX))
                .cloned()
                .collect()),
            Err(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_roundtrip() {
        let kv = MemoryKv::new();

        kv.store("t1", &json!({"mem": 512})).unwrap();
        assert_eq!(kv.fetch("t1", false).unwrap(), Some(json!({"mem": 512})));

        kv.delete("t1").unwrap();
        assert_eq!(kv.fetch("t1", false).unwrap(), None);
    }

    #[test]
    fn test_token_names() {
        let kv = MemoryKv::new();

        kv.store("alpha", &json!({})).unwrap();
        kv.store("^TOKEN_OWNERS", &json!({})).unwrap();

        assert_eq!(kv.token_names().unwrap(), vec!["alpha".to_string()]);
    }
}
