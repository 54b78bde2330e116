//! The bounded store abstraction.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use civicsync_types::StoreRecord;
use serde::{Deserialize, Serialize};

/// Default maximum number of retained records.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default number of records written per transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Configuration for a bounded store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of records kept after any upsert.
    pub capacity: usize,
    /// Records per transaction during bulk upsert.
    pub chunk_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl StoreConfig {
    /// Rejects zero capacity or chunk size.
    pub fn validate(&self) -> StorageResult<()> {
        if self.capacity == 0 {
            return Err(StorageError::InvalidData("capacity must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(StorageError::InvalidData("chunk size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of a successful bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Records inserted or replaced.
    pub written: usize,
    /// Records removed by the eviction pass.
    pub evicted: usize,
}

/// A capacity-bounded, durable store of records keyed by entity id.
///
/// Every operation is atomic on its own; no external locking is needed.
#[async_trait]
pub trait BoundedStore: Send + Sync {
    /// Maximum number of records retained.
    fn capacity(&self) -> usize;

    /// Inserts or replaces records by id, then evicts the oldest records
    /// until at most [`capacity`](Self::capacity) remain.
    ///
    /// Records are written in chunks, each committed on its own. If a chunk
    /// fails, earlier chunks stay committed, eviction still runs, and the
    /// chunk's error is returned.
    async fn upsert_many(&self, records: Vec<StoreRecord>) -> StorageResult<UpsertReport>;

    /// All retained records, oldest observation first. Records sharing a
    /// stamp keep the order of the batch that wrote them.
    async fn get_all(&self) -> StorageResult<Vec<StoreRecord>>;

    /// Number of retained records.
    async fn count(&self) -> StorageResult<usize>;

    /// Removes every record. Only for explicit resets.
    async fn clear(&self) -> StorageResult<()>;
}
