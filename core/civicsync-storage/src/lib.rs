//! Bounded SQLite record store for civicsync.
//!
//! Keeps a durable, capacity-bounded copy of one resource collection so the
//! coordinator has something to serve when the network is out of reach.
//!
//! # Architecture
//!
//! - One table per resource, keyed by entity id, payload kept as JSON text
//! - Bulk upserts are applied in fixed-size chunks, one transaction each
//! - After every upsert the oldest records (by observation stamp) are evicted
//!   until the table is back at capacity
//! - All SQLite work runs on the blocking pool; the connection lock is held
//!   for a whole batch so readers never see half of one

mod error;
mod sqlite;
mod store;

pub use error::{StorageError, StorageResult};
pub use sqlite::{table_name_for, SqliteRecordStore};
pub use store::{BoundedStore, StoreConfig, UpsertReport, DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE};
