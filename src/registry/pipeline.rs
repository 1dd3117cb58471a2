//! Create/update and delete orchestration.
//!
//! Every mutation runs the same shape: validate before the lock, then under
//! [`super::TOKEN_LOCK`] read authoritative state, authorize, check the
//! version hash, and write in visibility order — token record first, then the
//! new owner's shard entry, then the old owner's removal. A reader can
//! transiently see a moving token in both shards, never in neither. Peer
//! broadcasts happen in the API layer, after the lock is released.

use serde_json::Value;

use super::hash::{self, etag_for_match};
use super::index::{
    ensure_owner_key, insert_index_entry, load_shard, owner_shard_key, remove_index_entry,
    IndexEntry,
};
use super::record::{self, TokenRecord, RECOGNIZED_PARAMS, USER_METADATA_KEYS};
use super::{Registry, RegistryError, UpdateMode};

/// One create-or-update request, already parsed and attributed.
#[derive(Clone, Debug)]
pub struct WriteRequest {
    pub auth_user: String,
    /// Target cluster, resolved by the cluster calculator from the request.
    pub cluster: String,
    pub if_match: Option<String>,
    pub mode: UpdateMode,
    pub record: TokenRecord,
    pub token: String,
}

#[derive(Debug)]
pub struct WriteOutcome {
    /// False for the idempotent short-circuit; no write happened and no peer
    /// broadcast is owed.
    pub changed: bool,
    pub description: Value,
    pub etag: String,
    pub message: String,
    pub owner: String,
}

#[derive(Debug)]
pub struct DeleteOutcome {
    pub hard: bool,
    pub owner: Option<String>,
    pub token: String,
}

impl Registry {
    /// Lock-free read of a token record and its version hash.
    pub fn get_token(&self, token: &str) -> Result<Option<(TokenRecord, String)>, RegistryError> {
        match self.fetch_record(token, false)? {
            Some(record) => {
                let etag = hash::token_hash(&record)?;
                Ok(Some((record, etag)))
            }
            None => Ok(None),
        }
    }

    pub async fn create_or_update(
        &self,
        request: WriteRequest,
    ) -> Result<WriteOutcome, RegistryError> {
        record::validate_token_name(&request.token, &self.settings.reserved_tokens)?;
        record::validate_request(&request.record, request.mode)?;
        self.validator
            .validate(&request.record.params)
            .map_err(RegistryError::Validation)?;

        self.with_token_lock(|| self.write_under_lock(&request)).await
    }

    fn write_under_lock(&self, request: &WriteRequest) -> Result<WriteOutcome, RegistryError> {
        let kv = self.kv.as_ref();
        let token = request.token.as_str();
        let existing = self.fetch_record(token, true)?;

        // Proposed record: the body wins over defaults, defaults win over
        // nothing. Normal mode reaches this point with the system metadata
        // fields guaranteed absent from the body.
        let mut proposed = request.record.clone();
        {
            let md = &mut proposed.metadata;
            if md.cluster.is_none() {
                md.cluster = Some(request.cluster.clone());
            }
            if md.last_update_time.is_none() {
                md.last_update_time = Some(self.clock.now_ms());
            }
            if md.last_update_user.is_none() {
                md.last_update_user = Some(request.auth_user.clone());
            }
            if md.owner.is_none() {
                md.owner = existing
                    .as_ref()
                    .and_then(|e| e.metadata.owner.clone())
                    .or_else(|| Some(request.auth_user.clone()));
            }
            if md.root.is_none() {
                md.root = existing
                    .as_ref()
                    .and_then(|e| e.metadata.root.clone())
                    .or_else(|| Some(self.settings.root.clone()));
            }
        }
        let new_owner = match proposed.owner() {
            Some(owner) => owner.to_string(),
            None => {
                return Err(RegistryError::Validation(
                    "Owner must not be blank".to_string(),
                ))
            }
        };

        self.authorize_write(request, existing.as_ref(), &proposed, &new_owner)?;

        if let Some(if_match) = &request.if_match {
            let current = etag_for_match(existing.as_ref())?;
            if *if_match != current {
                return Err(RegistryError::PreconditionFailed(format!(
                    "Token {token} was modified concurrently; the supplied version hash is stale"
                )));
            }
        }

        // Idempotent short-circuit: identical user-editable projections mean
        // nothing to write. Tombstoned records never short-circuit, since
        // re-creating one must clear the deletion flag.
        if request.mode != UpdateMode::Admin {
            if let Some(existing) = existing.as_ref().filter(|e| !e.is_deleted()) {
                if user_editable_value(&proposed)? == user_editable_value(existing)? {
                    return Ok(WriteOutcome {
                        changed: false,
                        description: description_view(existing)?,
                        etag: hash::token_hash(existing)?,
                        message: format!("No changes detected for {token}"),
                        owner: new_owner,
                    });
                }
            }
        }

        if request.mode == UpdateMode::Normal {
            self.check_owner_quota(token, &new_owner)?;
        }

        if let Some(existing) = &existing {
            proposed.push_history(existing, self.settings.history_length)?;
        } else {
            let limit = self.settings.history_length;
            proposed.metadata.previous.truncate(limit);
        }

        let etag = hash::token_hash(&proposed)?;
        self.store_record(token, &proposed)?;

        let shard_key = ensure_owner_key(kv, &new_owner)?;
        insert_index_entry(
            kv,
            &shard_key,
            token,
            IndexEntry::new(
                etag.clone(),
                proposed.is_deleted(),
                proposed.metadata.last_update_time.unwrap_or(0),
            ),
        )?;

        if let Some(old_owner) = existing.as_ref().and_then(|e| e.owner()) {
            if old_owner != new_owner {
                match owner_shard_key(kv, old_owner, true)? {
                    Some(old_key) => remove_index_entry(kv, &old_key, token)?,
                    None => {
                        return Err(RegistryError::Internal(format!(
                            "No shard key for owner {old_owner}"
                        )))
                    }
                }
            }
        }

        let created = existing.as_ref().map(|e| e.is_deleted()).unwrap_or(true);
        let message = if created {
            format!("Successfully created {token}")
        } else {
            format!("Successfully updated {token}")
        };
        tracing::info!(etag = %etag, owner = %new_owner, token = %token, "Stored token");

        Ok(WriteOutcome {
            changed: true,
            description: description_view(&proposed)?,
            etag,
            message,
            owner: new_owner,
        })
    }

    fn authorize_write(
        &self,
        request: &WriteRequest,
        existing: Option<&TokenRecord>,
        proposed: &TokenRecord,
        new_owner: &str,
    ) -> Result<(), RegistryError> {
        let user = request.auth_user.as_str();
        let token = request.token.as_str();

        match request.mode {
            UpdateMode::Admin => {
                if !self.authz.administer_token(user, token, &proposed.metadata) {
                    return Err(RegistryError::Authorization(format!(
                        "User {user} may not administer token {token}"
                    )));
                }
                if existing.is_some() && request.if_match.is_none() {
                    return Err(RegistryError::Validation(
                        "An if-match header is required for admin updates of an existing token"
                            .to_string(),
                    ));
                }
            }
            UpdateMode::Normal => {
                if let Some(run_as) = proposed.params.run_as_user.as_deref() {
                    if run_as != "*" && !self.authz.run_as(user, run_as) {
                        return Err(RegistryError::Authorization(format!(
                            "User {user} may not run services as {run_as}"
                        )));
                    }
                }
                match existing.and_then(|e| e.owner()) {
                    Some(existing_owner) if existing_owner != new_owner => {
                        let existing_md = existing
                            .map(|e| e.metadata.clone())
                            .unwrap_or_default();
                        if !self.authz.manage_token(user, token, &existing_md) {
                            return Err(RegistryError::Authorization(format!(
                                "User {user} may not transfer token {token} away from {existing_owner}"
                            )));
                        }
                    }
                    Some(_) => {}
                    None => {
                        if !self.authz.run_as(user, new_owner) {
                            return Err(RegistryError::Authorization(format!(
                                "User {user} may not create tokens owned by {new_owner}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-owner quota over live shard entries, excluding the slot being
    /// written. Admin mode skips this entirely.
    fn check_owner_quota(&self, token: &str, owner: &str) -> Result<(), RegistryError> {
        let quota = match self.settings.owner_quota {
            Some(quota) => quota,
            None => return Ok(()),
        };
        let kv = self.kv.as_ref();
        let shard_key = match owner_shard_key(kv, owner, true)? {
            Some(key) => key,
            None => return Ok(()),
        };
        let shard = load_shard(kv, &shard_key, true)?;
        let live = shard
            .iter()
            .filter(|(name, entry)| !entry.deleted && name.as_str() != token)
            .count();
        if live >= quota {
            return Err(RegistryError::QuotaExceeded(format!(
                "Owner {owner} has reached the token limit ({quota}); delete an unused token and retry"
            )));
        }
        Ok(())
    }

    pub async fn delete_token(
        &self,
        auth_user: &str,
        token: &str,
        if_match: Option<String>,
        hard: bool,
    ) -> Result<DeleteOutcome, RegistryError> {
        if token.trim().is_empty() {
            return Err(RegistryError::Validation("Token name is required".to_string()));
        }
        self.with_token_lock(|| {
            self.delete_under_lock(auth_user, token, if_match.as_deref(), hard)
        })
        .await
    }

    fn delete_under_lock(
        &self,
        user: &str,
        token: &str,
        if_match: Option<&str>,
        hard: bool,
    ) -> Result<DeleteOutcome, RegistryError> {
        let kv = self.kv.as_ref();
        let existing = match self.fetch_record(token, true)? {
            Some(record) if !record.is_empty_shell() => record,
            _ => {
                return Err(RegistryError::NotFound(format!(
                    "Couldn't find token {token}"
                )))
            }
        };
        if !hard && existing.is_deleted() {
            return Err(RegistryError::NotFound(format!(
                "Couldn't find token {token}"
            )));
        }

        if hard {
            if !self.authz.administer_token(user, token, &existing.metadata) {
                return Err(RegistryError::Authorization(format!(
                    "User {user} may not administer token {token}"
                )));
            }
            if !existing.is_deleted() && if_match.is_none() {
                return Err(RegistryError::Validation(
                    "An if-match header is required to hard-delete a live token".to_string(),
                ));
            }
        } else if !self.authz.manage_token(user, token, &existing.metadata) {
            return Err(RegistryError::Authorization(format!(
                "User {user} may not delete token {token}"
            )));
        }

        if let Some(if_match) = if_match {
            let current = etag_for_match(Some(&existing))?;
            if if_match != current {
                return Err(RegistryError::PreconditionFailed(format!(
                    "Token {token} was modified concurrently; the supplied version hash is stale"
                )));
            }
        }

        let owner = existing.owner().map(str::to_string);

        if hard {
            kv.delete(token)?;
            match &owner {
                Some(owner) => match owner_shard_key(kv, owner, true)? {
                    Some(shard_key) => remove_index_entry(kv, &shard_key, token)?,
                    None => {
                        return Err(RegistryError::Internal(format!(
                            "No shard key for owner {owner}"
                        )))
                    }
                },
                None => {
                    tracing::warn!(token = %token, "Hard-deleted token had no owner; index untouched");
                }
            }
            tracing::info!(token = %token, user = %user, "Hard-deleted token");
        } else {
            let mut tombstone = existing.clone();
            tombstone.metadata.deleted = Some(true);
            tombstone.metadata.last_update_time = Some(self.clock.now_ms());
            tombstone.metadata.last_update_user = Some(user.to_string());
            tombstone.push_history(&existing, self.settings.history_length)?;

            let etag = hash::token_hash(&tombstone)?;
            let last_update_time = tombstone.metadata.last_update_time.unwrap_or(0);
            self.store_record(token, &tombstone)?;
            match &owner {
                Some(owner) => {
                    let shard_key = ensure_owner_key(kv, owner)?;
                    insert_index_entry(
                        kv,
                        &shard_key,
                        token,
                        IndexEntry::new(etag, true, last_update_time),
                    )?;
                }
                None => {
                    tracing::warn!(token = %token, "Soft-deleted token had no owner; index untouched");
                }
            }
            tracing::info!(token = %token, user = %user, "Soft-deleted token");
        }

        Ok(DeleteOutcome {
            hard,
            owner,
            token: token.to_string(),
        })
    }
}

/// Projection a requester may influence directly: the sanitized parameters
/// plus the user metadata. Equal projections make an update a no-op.
fn user_editable_value(record: &TokenRecord) -> Result<Value, RegistryError> {
    match hash::sanitized_value(record)? {
        Value::Object(map) => Ok(Value::Object(
            map.into_iter()
                .filter(|(key, _)| {
                    RECOGNIZED_PARAMS.contains(&key.as_str())
                        || USER_METADATA_KEYS.contains(&key.as_str())
                })
                .collect(),
        )),
        other => Ok(other),
    }
}

/// The description returned to clients: the stored record minus its history.
fn description_view(record: &TokenRecord) -> Result<Value, RegistryError> {
    let mut value = record.to_value()?;
    if let Some(map) = value.as_object_mut() {
        map.remove("previous");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::index::{load_directory, load_shard};
    use crate::testutil::{admin_req, seed_token, setup_registry, setup_registry_with, write_req};

    #[tokio::test]
    async fn test_create_then_noop() {
        let registry = setup_registry();
        let body = json!({"cmd": "run", "cpus": 1, "mem": 512, "owner": "alice", "run-as-user": "alice"});

        let first = registry
            .create_or_update(write_req("t1", "alice", body.clone()))
            .await
            .unwrap();
        assert!(first.changed);
        assert_eq!(first.message, "Successfully created t1");

        let second = registry
            .create_or_update(write_req("t1", "alice", body))
            .await
            .unwrap();
        assert!(!second.changed);
        assert_eq!(second.message, "No changes detected for t1");
        assert_eq!(second.etag, first.etag);
    }

    #[tokio::test]
    async fn test_update_observes_prior_write_and_keeps_history() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "v1", "owner": "alice"})).await;

        let updated = registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v2", "owner": "alice"})))
            .await
            .unwrap();
        assert_eq!(updated.message, "Successfully updated t1");

        let (record, _) = registry.get_token("t1").unwrap().unwrap();
        assert_eq!(record.params.cmd.as_deref(), Some("v2"));
        assert_eq!(record.metadata.previous.len(), 1);
        assert_eq!(record.metadata.previous[0].get("cmd"), Some(&json!("v1")));
    }

    #[tokio::test]
    async fn test_stale_if_match_rejected() {
        let registry = setup_registry();
        let first = registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v1", "owner": "alice"})))
            .await
            .unwrap();
        registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v2", "owner": "alice"})))
            .await
            .unwrap();

        let mut stale = write_req("t1", "alice", json!({"cmd": "v3", "owner": "alice"}));
        stale.if_match = Some(first.etag);
        let err = registry.create_or_update(stale).await.unwrap_err();
        assert!(matches!(err, RegistryError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_matching_if_match_accepted() {
        let registry = setup_registry();
        let first = registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v1", "owner": "alice"})))
            .await
            .unwrap();

        let mut update = write_req("t1", "alice", json!({"cmd": "v2", "owner": "alice"}));
        update.if_match = Some(first.etag);
        registry.create_or_update(update).await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_update_of_existing_requires_if_match() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "v1", "owner": "alice"})).await;

        let err = registry
            .create_or_update(admin_req("t1", json!({"cmd": "v2", "owner": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        let (_, etag) = registry.get_token("t1").unwrap().unwrap();
        let mut with_hash = admin_req("t1", json!({"cmd": "v2", "owner": "alice"}));
        with_hash.if_match = Some(etag);
        registry.create_or_update(with_hash).await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_may_set_system_metadata() {
        let registry = setup_registry();

        let outcome = registry
            .create_or_update(admin_req(
                "t1",
                json!({
                    "cmd": "run",
                    "last-update-time": 1600000000000i64,
                    "last-update-user": "importer",
                    "owner": "alice",
                    "root": "cluster-b"
                }),
            ))
            .await
            .unwrap();
        assert!(outcome.changed);

        let (record, _) = registry.get_token("t1").unwrap().unwrap();
        assert_eq!(record.metadata.last_update_time, Some(1600000000000));
        assert_eq!(record.metadata.last_update_user.as_deref(), Some("importer"));
        assert_eq!(record.metadata.root.as_deref(), Some("cluster-b"));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_use_admin_mode() {
        let registry = setup_registry();
        let mut req = write_req("t1", "alice", json!({"cmd": "run", "owner": "alice"}));
        req.mode = UpdateMode::Admin;

        let err = registry.create_or_update(req).await.unwrap_err();
        assert!(matches!(err, RegistryError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_run_as_denied_for_other_user() {
        let registry = setup_registry();
        let err = registry
            .create_or_update(write_req(
                "t1",
                "mallory",
                json!({"cmd": "run", "owner": "mallory", "run-as-user": "alice"}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_wildcard_run_as_allowed() {
        let registry = setup_registry();
        registry
            .create_or_update(write_req(
                "t1",
                "alice",
                json!({"cmd": "run", "owner": "alice", "run-as-user": "*"}),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_for_other_owner_denied() {
        let registry = setup_registry();
        let err = registry
            .create_or_update(write_req("t1", "mallory", json!({"cmd": "run", "owner": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_ownership_transfer_moves_shard_entry() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;

        // The admin reassigns the token to bob.
        let mut transfer = write_req("t1", "admin", json!({"cmd": "run", "owner": "bob"}));
        transfer.mode = UpdateMode::Normal;
        registry.create_or_update(transfer).await.unwrap();

        let kv = registry.kv.as_ref();
        let directory = load_directory(kv, true).unwrap();
        let alice_shard = load_shard(kv, directory.get("alice").unwrap(), true).unwrap();
        let bob_shard = load_shard(kv, directory.get("bob").unwrap(), true).unwrap();
        assert!(!alice_shard.contains_key("t1"));
        assert!(bob_shard.contains_key("t1"));
    }

    #[tokio::test]
    async fn test_transfer_denied_without_manage() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;

        let err = registry
            .create_or_update(write_req("t1", "bob", json!({"cmd": "run", "owner": "bob"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_quota_excludes_own_slot_and_tombstones() {
        let registry = setup_registry_with(|settings| settings.owner_quota = Some(2));
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;
        seed_token(&registry, "t2", json!({"cmd": "run", "owner": "alice"})).await;

        // Updating an existing token is not a quota violation.
        registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v2", "owner": "alice"})))
            .await
            .unwrap();

        let err = registry
            .create_or_update(write_req("t3", "alice", json!({"cmd": "run", "owner": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::QuotaExceeded(_)));

        registry.delete_token("alice", "t2", None, false).await.unwrap();
        registry
            .create_or_update(write_req("t3", "alice", json!({"cmd": "run", "owner": "alice"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_admin_mode_skips_quota() {
        let registry = setup_registry_with(|settings| settings.owner_quota = Some(1));
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;

        registry
            .create_or_update(admin_req("t2", json!({"cmd": "run", "owner": "alice"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_soft_delete_tombstones_and_reindexes() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;

        let outcome = registry.delete_token("alice", "t1", None, false).await.unwrap();
        assert!(!outcome.hard);
        assert_eq!(outcome.owner.as_deref(), Some("alice"));

        let (record, _) = registry.get_token("t1").unwrap().unwrap();
        assert!(record.is_deleted());
        assert_eq!(record.metadata.previous.len(), 1);

        let kv = registry.kv.as_ref();
        let directory = load_directory(kv, true).unwrap();
        let shard = load_shard(kv, directory.get("alice").unwrap(), true).unwrap();
        assert!(shard.get("t1").unwrap().deleted);
    }

    #[tokio::test]
    async fn test_soft_deleted_token_404s_on_repeat_delete() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;
        registry.delete_token("alice", "t1", None, false).await.unwrap();

        let err = registry
            .delete_token("alice", "t1", None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_hard_delete_requirements() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;

        // Non-admin denied outright.
        let err = registry.delete_token("alice", "t1", None, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::Authorization(_)));

        // Admin without a version hash on a live token: validation error.
        let err = registry.delete_token("admin", "t1", None, true).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        let (_, etag) = registry.get_token("t1").unwrap().unwrap();
        registry
            .delete_token("admin", "t1", Some(etag), true)
            .await
            .unwrap();

        assert!(registry.get_token("t1").unwrap().is_none());
        let kv = registry.kv.as_ref();
        let directory = load_directory(kv, true).unwrap();
        let shard = load_shard(kv, directory.get("alice").unwrap(), true).unwrap();
        assert!(!shard.contains_key("t1"));
    }

    #[tokio::test]
    async fn test_hard_delete_of_tombstone_needs_no_hash() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "run", "owner": "alice"})).await;
        registry.delete_token("alice", "t1", None, false).await.unwrap();

        registry.delete_token("admin", "t1", None, true).await.unwrap();
        assert!(registry.get_token("t1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_token_404s() {
        let registry = setup_registry();
        let err = registry.delete_token("alice", "ghost", None, false).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_recreate_after_soft_delete_clears_tombstone() {
        let registry = setup_registry();
        let body = json!({"cmd": "run", "owner": "alice"});
        seed_token(&registry, "t1", body.clone()).await;
        registry.delete_token("alice", "t1", None, false).await.unwrap();

        let outcome = registry
            .create_or_update(write_req("t1", "alice", body))
            .await
            .unwrap();
        // Identical payload, but the tombstone makes this a real write.
        assert!(outcome.changed);
        assert_eq!(outcome.message, "Successfully created t1");

        let (record, _) = registry.get_token("t1").unwrap().unwrap();
        assert!(!record.is_deleted());
    }

    #[tokio::test]
    async fn test_last_update_time_advances_per_write() {
        let registry = setup_registry();
        seed_token(&registry, "t1", json!({"cmd": "v1", "owner": "alice"})).await;
        let (first, _) = registry.get_token("t1").unwrap().unwrap();

        registry
            .create_or_update(write_req("t1", "alice", json!({"cmd": "v2", "owner": "alice"})))
            .await
            .unwrap();
        let (second, _) = registry.get_token("t1").unwrap().unwrap();

        assert!(second.metadata.last_update_time > first.metadata.last_update_time);
        assert_eq!(second.metadata.last_update_user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_reserved_token_name_rejected() {
        let registry = setup_registry();
        let err = registry
            .create_or_update(write_req("localhost", "alice", json!({"cmd": "run"})))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }
}
