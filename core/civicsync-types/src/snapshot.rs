//! Entities, durable records and collection snapshots.
//!
//! A snapshot is the complete view of one resource collection at one point in
//! time, tagged with where it came from and whether it is stale. Entities
//! carry an opaque JSON payload; the core never looks inside it except to
//! pick a display field for notifications.

use crate::{EntityId, ObservedAt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// A live request/response exchange.
    Network,
    /// The durable store, after a live exchange could not complete.
    Cache,
    /// The long-lived push feed.
    Push,
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Cache => f.write_str("cache"),
            Self::Push => f.write_str("push"),
        }
    }
}

/// A single domain record tracked by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id within the collection.
    pub id: EntityId,

    /// Resource-specific data, uninterpreted.
    pub payload: Value,

    /// When the core accepted this entity. `None` until the entity has been
    /// stamped by a coordinator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<ObservedAt>,
}

impl Entity {
    /// Creates an unstamped entity.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            observed_at: None,
        }
    }

    /// Sets the observation stamp.
    #[must_use]
    pub fn observed(mut self, at: ObservedAt) -> Self {
        self.observed_at = Some(at);
        self
    }

    /// Returns a string field of the payload, if present.
    #[must_use]
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}

impl From<StoreRecord> for Entity {
    fn from(record: StoreRecord) -> Self {
        Self {
            id: record.id,
            payload: record.payload,
            observed_at: Some(record.observed_at),
        }
    }
}

/// The durable representation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: EntityId,
    pub payload: Value,
    pub observed_at: ObservedAt,
}

impl StoreRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, payload: Value, observed_at: ObservedAt) -> Self {
        Self {
            id: id.into(),
            payload,
            observed_at,
        }
    }

    /// Builds a record from an entity, using `fallback` when the entity has
    /// not been stamped.
    #[must_use]
    pub fn from_entity(entity: &Entity, fallback: ObservedAt) -> Self {
        Self {
            id: entity.id.clone(),
            payload: entity.payload.clone(),
            observed_at: entity.observed_at.unwrap_or(fallback),
        }
    }
}

/// What the core currently believes a collection looks like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// Entities in collection order.
    pub entities: Vec<Entity>,

    /// Origin of this snapshot.
    pub source: SnapshotSource,

    /// True when served from the store because a live fetch failed.
    pub is_stale: bool,
}

impl CollectionSnapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(entities: Vec<Entity>, source: SnapshotSource, is_stale: bool) -> Self {
        Self {
            entities,
            source,
            is_stale,
        }
    }

    /// A fresh snapshot from a live exchange.
    #[must_use]
    pub fn network(entities: Vec<Entity>) -> Self {
        Self::new(entities, SnapshotSource::Network, false)
    }

    /// A stale snapshot read back from the store.
    #[must_use]
    pub fn cache(entities: Vec<Entity>) -> Self {
        Self::new(entities, SnapshotSource::Cache, true)
    }

    /// A snapshot delivered by the push feed.
    #[must_use]
    pub fn push(entities: Vec<Entity>) -> Self {
        Self::new(entities, SnapshotSource::Push, false)
    }

    /// An empty snapshot with the given provenance.
    #[must_use]
    pub fn empty(source: SnapshotSource, is_stale: bool) -> Self {
        Self::new(Vec::new(), source, is_stale)
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Set of ids present in this snapshot.
    #[must_use]
    pub fn ids(&self) -> HashSet<&EntityId> {
        self.entities.iter().map(|e| &e.id).collect()
    }

    /// Looks up an entity by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id.as_str() == id)
    }

    /// Stamps every entity with the same observation time.
    pub fn stamp(&mut self, at: ObservedAt) {
        for entity in &mut self.entities {
            entity.observed_at = Some(at);
        }
    }

    /// Converts the entities into store records.
    #[must_use]
    pub fn to_records(&self, fallback: ObservedAt) -> Vec<StoreRecord> {
        self.entities
            .iter()
            .map(|e| StoreRecord::from_entity(e, fallback))
            .collect()
    }
}

impl Default for CollectionSnapshot {
    fn default() -> Self {
        Self::empty(SnapshotSource::Cache, true)
    }
}
