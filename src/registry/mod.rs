pub mod hash;
pub mod index;
pub mod list;
pub mod locks;
pub mod pipeline;
pub mod record;

pub use index::IndexEntry;
pub use locks::{LockTable, TOKEN_LOCK};
pub use pipeline::{DeleteOutcome, WriteOutcome, WriteRequest};
pub use record::{ServiceParams, TokenMetadata, TokenRecord};

use std::sync::Arc;

use thiserror::Error;

use crate::auth::Authorizer;
use crate::config::TokenSettings;
use crate::kv::{KvError, KvStore};
use record::{DescriptionValidator, SyntacticValidator};

/// Failures surfaced by registry operations.
///
/// Each variant maps to one HTTP status in the API translator; the message is
/// the client-facing text and names the offending identifier where there is
/// one.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Validation(String),
}

impl From<KvError> for RegistryError {
    fn from(e: KvError) -> Self {
        RegistryError::Internal(e.to_string())
    }
}

/// Authoritative time source for `last-update-time` stamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Update authority of a write request. Admin mode may carry system metadata
/// and skips the owner quota, at the price of a mandatory version hash on
/// existing tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateMode {
    Admin,
    Normal,
}

/// The token registry: records, owner index, and the mutation pipeline.
///
/// All index-affecting mutations serialize on the [`TOKEN_LOCK`] named lock;
/// reads go straight to the KV adapter.
pub struct Registry {
    pub authz: Arc<dyn Authorizer>,
    pub clock: Arc<dyn Clock>,
    pub kv: Arc<dyn KvStore>,
    pub settings: TokenSettings,
    pub validator: Arc<dyn DescriptionValidator>,
    locks: LockTable,
}

impl Registry {
    pub fn new(
        kv: Arc<dyn KvStore>,
        authz: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            authz,
            clock,
            kv,
            locks: LockTable::new(),
            settings,
            validator: Arc::new(SyntacticValidator),
        }
    }

    /// Run `f` with the token mutation lock held. The critical section is
    /// synchronous: KV I/O and the authorization gate may block, but no peer
    /// I/O happens under the lock.
    pub(crate) async fn with_token_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        self.locks.with_lock(TOKEN_LOCK, f).await
    }

    /// Read a token record. `refresh` forces an authoritative read and is
    /// used by the mutation pipeline; plain reads serve cached state.
    pub fn fetch_record(
        &self,
        token: &str,
        refresh: bool,
    ) -> Result<Option<TokenRecord>, RegistryError> {
        match self.kv.fetch(token, refresh)? {
            Some(value) => match TokenRecord::from_value(&value) {
                Ok(record) => Ok(Some(record)),
                Err(e) => Err(RegistryError::Internal(format!(
                    "Corrupt token record {token}: {e}"
                ))),
            },
            None => Ok(None),
        }
    }

    pub(crate) fn store_record(&self, token: &str, record: &TokenRecord) -> Result<(), RegistryError> {
        let value = record.to_value()?;
        self.kv.store(token, &value)?;
        Ok(())
    }
}
