//! Owner index: a directory mapping each owner to an opaque shard key, and
//! per-owner shards mapping token names to index entries. Kept beside the
//! token records and maintained under the token lock.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{hash, Registry, RegistryError};
use crate::kv::KvStore;

/// Fixed key of the owner directory.
pub const OWNER_DIRECTORY_KEY: &str = "^TOKEN_OWNERS";

/// Shard keys are minted as this prefix plus a fresh UUID; they are never
/// reused across rebuilds.
pub const OWNER_SHARD_PREFIX: &str = "^TOKEN_OWNERS_";

pub type OwnerDirectory = BTreeMap<String, String>;
pub type OwnerShard = BTreeMap<String, IndexEntry>;

/// What a shard knows about one token: enough to list and to enforce quota
/// without fetching the record itself.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexEntry {
    pub deleted: bool,
    pub etag: String,
    pub last_update_time: i64,
}

impl IndexEntry {
    pub fn new(etag: String, deleted: bool, last_update_time: i64) -> Self {
        Self {
            deleted,
            etag,
            last_update_time,
        }
    }
}

pub fn load_directory(kv: &dyn KvStore, refresh: bool) -> Result<OwnerDirectory, RegistryError> {
    match kv.fetch(OWNER_DIRECTORY_KEY, refresh)? {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| RegistryError::Internal(format!("Corrupt owner directory: {e}"))),
        None => Ok(OwnerDirectory::new()),
    }
}

pub fn store_directory(kv: &dyn KvStore, directory: &OwnerDirectory) -> Result<(), RegistryError> {
    let value = serde_json::to_value(directory)
        .map_err(|e| RegistryError::Internal(format!("Owner directory encoding failed: {e}")))?;
    kv.store(OWNER_DIRECTORY_KEY, &value)?;
    Ok(())
}

/// A directory entry pointing at a missing shard reads as empty; re-index
/// recreates the shard on its next run.
pub fn load_shard(
    kv: &dyn KvStore,
    shard_key: &str,
    refresh: bool,
) -> Result<OwnerShard, RegistryError> {
    match kv.fetch(shard_key, refresh)? {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| RegistryError::Internal(format!("Corrupt owner shard {shard_key}: {e}"))),
        None => Ok(OwnerShard::new()),
    }
}

pub fn store_shard(
    kv: &dyn KvStore,
    shard_key: &str,
    shard: &OwnerShard,
) -> Result<(), RegistryError> {
    let value = serde_json::to_value(shard)
        .map_err(|e| RegistryError::Internal(format!("Owner shard encoding failed: {e}")))?;
    kv.store(shard_key, &value)?;
    Ok(())
}

fn mint_shard_key() -> String {
    format!("{OWNER_SHARD_PREFIX}{}", Uuid::new_v4())
}

/// The owner's current shard key, if the directory has one.
pub fn owner_shard_key(
    kv: &dyn KvStore,
    owner: &str,
    refresh: bool,
) -> Result<Option<String>, RegistryError> {
    Ok(load_directory(kv, refresh)?.get(owner).cloned())
}

/// Return the owner's shard key, minting one and updating the directory if
/// absent. Must run inside the token lock.
pub fn ensure_owner_key(kv: &dyn KvStore, owner: &str) -> Result<String, RegistryError> {
    if owner.trim().is_empty() {
        return Err(RegistryError::Internal(
            "Owner is required to locate an index shard".to_string(),
        ));
    }

    let mut directory = load_directory(kv, true)?;
    if let Some(existing) = directory.get(owner) {
        return Ok(existing.clone());
    }

    let shard_key = mint_shard_key();
    directory.insert(owner.to_string(), shard_key.clone());
    store_directory(kv, &directory)?;
    tracing::debug!(owner = %owner, shard_key = %shard_key, "Minted owner shard key");
    Ok(shard_key)
}

/// Insert or update one token's entry in a shard. Lock held by the caller.
pub fn insert_index_entry(
    kv: &dyn KvStore,
    shard_key: &str,
    token: &str,
    entry: IndexEntry,
) -> Result<(), RegistryError> {
    let mut shard = load_shard(kv, shard_key, true)?;
    shard.insert(token.to_string(), entry);
    store_shard(kv, shard_key, &shard)
}

/// Remove one token's entry from a shard. Lock held by the caller.
pub fn remove_index_entry(
    kv: &dyn KvStore,
    shard_key: &str,
    token: &str,
) -> Result<(), RegistryError> {
    let mut shard = load_shard(kv, shard_key, true)?;
    if shard.remove(token).is_some() {
        store_shard(kv, shard_key, &shard)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ReindexSummary {
    pub owners: usize,
    pub tokens: usize,
}

impl Registry {
    /// Rebuild the directory and every owner shard from the supplied token
    /// names.
    ///
    /// Write order matters: new shards are all written before the directory
    /// flips to them, and stale shards are deleted only afterwards. A
    /// concurrent reader therefore sees either the old directory over intact
    /// old shards or the new directory over already-written new shards, never
    /// an owner lookup landing on a missing shard.
    pub async fn reindex(&self, tokens: Vec<String>) -> Result<ReindexSummary, RegistryError> {
        self.with_token_lock(|| self.reindex_under_lock(tokens)).await
    }

    fn reindex_under_lock(&self, tokens: Vec<String>) -> Result<ReindexSummary, RegistryError> {
        let kv = self.kv.as_ref();
        let old_directory = load_directory(kv, true)?;

        let mut shards_by_owner: BTreeMap<String, OwnerShard> = BTreeMap::new();
        let mut indexed = 0usize;
        for token in &tokens {
            let record = match self.fetch_record(token, true)? {
                Some(record) => record,
                None => continue,
            };
            let owner = match record.owner() {
                Some(owner) => owner.to_string(),
                None => {
                    tracing::warn!(token = %token, "Skipping ownerless token during re-index");
                    continue;
                }
            };
            let entry = IndexEntry::new(
                hash::token_hash(&record)?,
                record.is_deleted(),
                record.metadata.last_update_time.unwrap_or(0),
            );
            shards_by_owner.entry(owner).or_default().insert(token.clone(), entry);
            indexed += 1;
        }

        let mut new_directory = OwnerDirectory::new();
        for (owner, shard) in &shards_by_owner {
            let shard_key = mint_shard_key();
            store_shard(kv, &shard_key, shard)?;
            new_directory.insert(owner.clone(), shard_key);
        }

        store_directory(kv, &new_directory)?;

        let live_keys: BTreeSet<&String> = new_directory.values().collect();
        for old_key in old_directory.values() {
            if !live_keys.contains(old_key) {
                self.kv.delete(old_key)?;
            }
        }

        let summary = ReindexSummary {
            owners: new_directory.len(),
            tokens: indexed,
        };
        tracing::info!(owners = summary.owners, tokens = summary.tokens, "Re-indexed tokens");
        Ok(summary)
    }
}
