//! Core type definitions for civicsync.
//!
//! This crate defines the resource-agnostic types shared by the store, the
//! fetch/push transports and the coordinator:
//! - Entity identifiers and observation timestamps
//! - Entities, durable store records and collection snapshots
//! - Connectivity state
//! - Wire decoding of server collections
//!
//! Resource-specific payloads (job postings, device positions, ...) are opaque
//! JSON objects; nothing here interprets them beyond `id`.

mod connectivity;
mod ids;
mod snapshot;
mod timestamp;
pub mod wire;

pub use connectivity::{ConnectivityState, ConnectivityTransition};
pub use ids::EntityId;
pub use snapshot::{CollectionSnapshot, Entity, SnapshotSource, StoreRecord};
pub use timestamp::ObservedAt;
pub use wire::decode_collection;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("schema mismatch: {0}")]
    Schema(String),
}
