//! Offline-first sync for civicsync resources.
//!
//! Each resource (job postings, live device positions, ...) is kept current
//! by a [`SyncCoordinator`] that combines three sources:
//! - a request/response fetch with a hard timeout ([`TimedFetcher`])
//! - a long-lived push feed that reconnects on its own
//!   ([`ReconnectingChannel`])
//! - a bounded durable store used when the network cannot answer
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Connectivity**: Reports online/offline as signalled by the host
//! - **Fetcher**: Races one exchange against a timer and validates the body
//! - **Change detection**: Counts entities that were not seen before
//! - **Channel**: Push state machine with a pluggable reconnect policy
//! - **Coordinator**: Chooses the source, persists, diffs, notifies, publishes
//! - **Service**: Connects the above for one resource and runs it
//!
//! ## Refresh
//!
//! 1. **Offline**: Serve the store, stale
//! 2. **Online**: Fetch under the resource timeout
//! 3. **Success**: Stamp, persist, diff, notify, publish
//! 4. **Failure**: Serve the store, stale, and resync on reconnect
//!
//! # Example
//!
//! ```no_run
//! use civicsync_storage::{SqliteRecordStore, StoreConfig};
//! use civicsync_sync::{
//!     ConnectivityMonitor, LogNotifier, ResourceDescriptor, SyncConfig, SyncCoordinator,
//!     TimedFetcher,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = ResourceDescriptor::new("jobs", "https://example.org/api/jobs");
//! let store = SqliteRecordStore::open("civicsync.db", "jobs", StoreConfig::default())?;
//! let monitor = ConnectivityMonitor::new();
//! monitor.set_online();
//!
//! let coordinator = SyncCoordinator::new(
//!     descriptor,
//!     SyncConfig::default(),
//!     monitor,
//!     Arc::new(store),
//!     TimedFetcher::http()?,
//!     Arc::new(LogNotifier::default()),
//! )?;
//! let snapshot = coordinator.refresh().await?;
//! println!("{} entities from {}", snapshot.len(), snapshot.source);
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod channel;
mod config;
pub mod connectivity;
mod coordinator;
mod error;
pub mod fetcher;
mod listeners;
pub mod notify;
pub mod reconnect;
mod service;
pub mod ws;

pub use change::{ChangeDetector, ChangeSummary};
pub use channel::{
    decode_push, ChannelState, ChannelStatus, PushConnection, PushConnector, PushHandler,
    ReconnectingChannel,
};
pub use config::{
    ResourceDescriptor, SyncConfig, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_TIMEOUT_MS,
};
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{SyncCoordinator, SyncStatus};
pub use error::{FetchError, NetworkCause, SyncError, SyncResult};
pub use fetcher::{Exchange, FetchRequest, HttpExchange, TimedFetcher};
pub use listeners::ListenerId;
pub use notify::{LogNotifier, NotificationSink};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use service::ResourceSync;
pub use ws::WsConnector;

// Re-export commonly used types
pub use civicsync_types::{
    CollectionSnapshot, ConnectivityState, ConnectivityTransition, Entity, EntityId, ObservedAt,
    SnapshotSource, StoreRecord,
};
