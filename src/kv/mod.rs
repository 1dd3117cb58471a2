pub mod cached;
pub mod memory;
pub mod store;

pub use cached::CachedKv;
pub use memory::MemoryKv;
pub use store::RedbKv;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// Opaque string-keyed store of structured map values.
///
/// The registry treats the store as non-transactional: every operation is a
/// single-key read or write, and multi-key edits are ordered by the caller.
/// `refresh = true` on a fetch must bypass any local caching layer and read
/// authoritative state. Writes by this replica are read-your-writes here;
/// other replicas converge via the peer-refresh protocol.
pub trait KvStore: Send + Sync {
    fn delete(&self, key: &str) -> Result<(), KvError>;

    fn fetch(&self, key: &str, refresh: bool) -> Result<Option<Value>, KvError>;

    fn store(&self, key: &str, value: &Value) -> Result<(), KvError>;

    /// Every key holding a token record (non-index keys). Used by re-index.
    fn token_names(&self) -> Result<Vec<String>, KvError>;
}
