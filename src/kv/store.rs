use std::path::Path;

use redb::{Database as RedbDatabase, ReadableTable, TableDefinition};
use serde_json::Value;

use super::{KvError, KvStore};

const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("registry");

/// Index keys carry this prefix; everything else is a token record.
pub const INDEX_KEY_PREFIX: char = '^';

/// Durable backing store on redb, one table, JSON-encoded values.
pub struct RedbKv {
    db: RedbDatabase,
}

impl RedbKv {
    /// Open or create the store under the given data directory.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, KvError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("token-registry.redb");
        let db = RedbDatabase::create(db_path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REGISTRY)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

impl KvStore for RedbKv {
    fn delete(&self, key: &str) -> Result<(), KvError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REGISTRY)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn fetch(&self, key: &str, _refresh: bool) -> Result<Option<Value>, KvError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REGISTRY)?;

        match table.get(key)? {
            Some(data) => {
                let value: Value = serde_json::from_slice(data.value())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn store(&self, key: &str, value: &Value) -> Result<(), KvError> {
        let data = serde_json::to_vec(value)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(REGISTRY)?;
            table.insert(key, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn token_names(&self) -> Result<Vec<String>, KvError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REGISTRY)?;

        let mut names = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            let key = key.value();
            if !key.starts_with(INDEX_KEY_PREFIX) {
                names.push(key.to_string());
            }
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn open_store() -> (RedbKv, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let kv = RedbKv::open(temp_dir.path()).unwrap();
        (kv, temp_dir)
    }

    #[test]
    fn test_store_fetch_delete() {
        let (kv, _temp) = open_store();

        kv.store("t1", &json!({"cpus": 1})).unwrap();
        assert_eq!(kv.fetch("t1", false).unwrap(), Some(json!({"cpus": 1})));
        assert_eq!(kv.fetch("t1", true).unwrap(), Some(json!({"cpus": 1})));

        kv.delete("t1").unwrap();
        assert_eq!(kv.fetch("t1", false).unwrap(), None);
    }

    #[test]
    fn test_token_names_skips_index_keys() {
        let (kv, _temp) = open_store();

        kv.store("t1", &json!({})).unwrap();
        kv.store("t2", &json!({})).unwrap();
        kv.store("^TOKEN_OWNERS", &json!({})).unwrap();
        kv.store("^TOKEN_OWNERS_abc", &json!({})).unwrap();

        let names = kv.token_names().unwrap();
        assert_eq!(names, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn test_fetch_absent() {
        let (kv, _temp) = open_store();
        assert_eq!(kv.fetch("missing", false).unwrap(), None);
    }
}
