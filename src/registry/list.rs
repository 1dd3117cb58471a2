//! Owner-scoped enumeration. Listing walks the owner index, not the token
//! records; records are only fetched when a parameter filter needs values.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use super::hash;
use super::index::{load_directory, load_shard, IndexEntry, OwnerDirectory, OwnerShard};
use super::record::TokenMetadata;
use super::{Registry, RegistryError};

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Restrict to tokens this user could manage.
    pub can_manage_as: Option<String>,
    pub include_deleted: bool,
    /// Owners to list; all directory owners when absent.
    pub owners: Option<BTreeSet<String>>,
    /// Parameter name to accepted stringified values.
    pub param_filters: BTreeMap<String, BTreeSet<String>>,
    pub show_metadata: bool,
}

impl Registry {
    pub fn list_tokens(&self, options: &ListOptions) -> Result<Vec<Value>, RegistryError> {
        let kv = self.kv.as_ref();
        let directory = load_directory(kv, false)?;

        let mut entries = Vec::new();
        for (owner, shard_key) in &directory {
            if let Some(wanted) = &options.owners {
                if !wanted.contains(owner) {
                    continue;
                }
            }
            let shard = load_shard(kv, shard_key, false)?;
            for (token, entry) in &shard {
                if entry.deleted && !options.include_deleted {
                    continue;
                }
                if let Some(manager) = &options.can_manage_as {
                    let metadata = TokenMetadata {
                        owner: Some(owner.clone()),
                        ..TokenMetadata::default()
                    };
                    if !self.authz.manage_token(manager, token, &metadata) {
                        continue;
                    }
                }
                if !options.param_filters.is_empty()
                    && !self.matches_param_filters(token, &options.param_filters)?
                {
                    continue;
                }
                entries.push(entry_value(token, owner, entry, options.show_metadata));
            }
        }
        Ok(entries)
    }

    pub fn list_owners(&self) -> Result<BTreeSet<String>, RegistryError> {
        Ok(load_directory(self.kv.as_ref(), false)?
            .into_keys()
            .collect())
    }

    /// The raw directory mapping, for operator inspection.
    pub fn owners_map(&self) -> Result<OwnerDirectory, RegistryError> {
        load_directory(self.kv.as_ref(), false)
    }

    /// Index entries for one owner, straight from the owner's shard.
    pub fn list_index_entries_for_owner(&self, owner: &str) -> Result<OwnerShard, RegistryError> {
        let kv = self.kv.as_ref();
        match load_directory(kv, false)?.get(owner) {
            Some(shard_key) => load_shard(kv, shard_key, false),
            None => Ok(OwnerShard::new()),
        }
    }

    fn matches_param_filters(
        &self,
        token: &str,
        filters: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<bool, RegistryError> {
        let record = match self.fetch_record(token, false)? {
            Some(record) => record,
            None => return Ok(false),
        };
        let data = match hash::sanitized_value(&record)? {
            Value::Object(map) => map,
            _ => return Ok(false),
        };
        for (param, accepted) in filters {
            let matched = data
                .get(param)
                .map(|value| accepted.contains(&stringify(value)))
                .unwrap_or(false);
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn entry_value(token: &str, owner: &str, entry: &IndexEntry, show_metadata: bool) -> Value {
    if !show_metadata {
        return json!({"owner": owner, "token": token});
    }
    let last_update_time = chrono::DateTime::from_timestamp_millis(entry.last_update_time)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    json!({
        "deleted": entry.deleted,
        "etag": entry.etag,
        "last-update-time": last_update_time,
        "owner": owner,
        "token": token,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::{seed_token, setup_registry};

    async fn seeded() -> Registry {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "cpus": 1, "owner": "alice"})).await;
        seed_token(&registry, "t2", json!({"cmd": "run", "cpus": 2, "owner": "alice"})).await;
        seed_token(&registry, "t3", json!({"cmd": "run", "cpus": 1, "owner": "bob"})).await;
        registry
    }

    fn tokens_of(entries: &[Value]) -> Vec<&str> {
        entries
            .iter()
            .filter_map(|e| e.get("token").and_then(Value::as_str))
            .collect()
    }

    #[tokio::test]
    async fn test_list_all_owners() {
        let registry = seeded().await;
        let entries = registry.list_tokens(&ListOptions::default()).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_owner_filter() {
        let registry = seeded().await;
        let options = ListOptions {
            owners: Some(["bob".to_string()].into_iter().collect()),
            ..ListOptions::default()
        };
        let entries = registry.list_tokens(&options).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t3"]);
    }

    #[tokio::test]
    async fn test_deleted_hidden_by_default() {
        let registry = seeded().await;
        registry.delete_token("alice", "t1", None, false).await.unwrap();

        let entries = registry.list_tokens(&ListOptions::default()).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t2", "t3"]);

        let options = ListOptions {
            include_deleted: true,
            ..ListOptions::default()
        };
        let entries = registry.list_tokens(&options).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_param_filter() {
        let registry = seeded().await;
        let options = ListOptions {
            param_filters: [(
                "cpus".to_string(),
                ["1".to_string()].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            ..ListOptions::default()
        };
        let entries = registry.list_tokens(&options).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t1", "t3"]);
    }

    #[tokio::test]
    async fn test_can_manage_as_filter() {
        let registry = seeded().await;
        let options = ListOptions {
            can_manage_as: Some("bob".to_string()),
            ..ListOptions::default()
        };
        let entries = registry.list_tokens(&options).unwrap();
        assert_eq!(tokens_of(&entries), vec!["t3"]);

        let options = ListOptions {
            can_manage_as: Some("admin".to_string()),
            ..ListOptions::default()
        };
        assert_eq!(registry.list_tokens(&options).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_entry_shapes() {
        let registry = seeded().await;

        let stripped = registry.list_tokens(&ListOptions::default()).unwrap();
        let entry = stripped.first().unwrap().as_object().unwrap();
        assert_eq!(entry.len(), 2);
        assert!(entry.contains_key("owner") && entry.contains_key("token"));

        let options = ListOptions {
            show_metadata: true,
            ..ListOptions::default()
        };
        let detailed = registry.list_tokens(&options).unwrap();
        let entry = detailed.first().unwrap().as_object().unwrap();
        assert!(entry.contains_key("etag"));
        assert_eq!(entry.get("deleted"), Some(&json!(false)));
        let iso = entry.get("last-update-time").unwrap().as_str().unwrap();
        assert!(iso.contains('T'), "expected ISO-8601, got {iso}");
    }

    #[tokio::test]
    async fn test_list_owners_and_owners_map() {
        let registry = seeded().await;

        let owners = registry.list_owners().unwrap();
        assert_eq!(
            owners,
            ["alice".to_string(), "bob".to_string()].into_iter().collect()
        );

        let map = registry.owners_map().unwrap();
        assert!(map.get("alice").unwrap().starts_with("^TOKEN_OWNERS_"));
    }
}
