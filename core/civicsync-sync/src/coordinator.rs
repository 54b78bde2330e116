//! Per-resource sync coordination.
//!
//! The coordinator owns the current snapshot of one resource and decides
//! where each new snapshot comes from:
//!
//! 1. Offline (or not yet known): straight to the store.
//! 2. Online: a timed fetch. On success the batch is stamped, persisted,
//!    diffed against the current snapshot and published.
//! 3. Fetch failed: the store again, marked stale.
//!
//! Whenever the network was skipped or failed, a resync is marked pending
//! and the next `offline -> online` transition triggers a fresh refresh.
//! Only [`SyncError::NoDataAvailable`] ever reaches the caller.

use crate::change::{ChangeDetector, ChangeSummary};
use crate::channel::PushHandler;
use crate::config::{ResourceDescriptor, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::{FetchRequest, TimedFetcher};
use crate::listeners::{ListenerId, Listeners};
use crate::notify::NotificationSink;
use async_trait::async_trait;
use civicsync_storage::BoundedStore;
use civicsync_types::{
    CollectionSnapshot, ConnectivityTransition, Entity, ObservedAt, SnapshotSource,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Provenance of the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_stale: bool,
    pub source: SnapshotSource,
    /// Stamp of the last batch obtained from a live fetch.
    pub last_network_sync: Option<ObservedAt>,
}

/// Result of one refresh, shared with callers that queued behind it.
#[derive(Clone)]
enum Outcome {
    Published(Arc<CollectionSnapshot>),
    NoData,
}

impl Outcome {
    fn into_result(self) -> SyncResult<CollectionSnapshot> {
        match self {
            Self::Published(snapshot) => Ok(Arc::unwrap_or_clone(snapshot)),
            Self::NoData => Err(SyncError::NoDataAvailable),
        }
    }
}

/// Keeps one resource's snapshot current across network, push and cache.
pub struct SyncCoordinator {
    descriptor: ResourceDescriptor,
    config: SyncConfig,
    request: FetchRequest,
    timeout: Duration,
    monitor: ConnectivityMonitor,
    store: Arc<dyn BoundedStore>,
    fetcher: TimedFetcher,
    notifier: Arc<dyn NotificationSink>,
    clock: Mutex<ObservedAt>,
    current: watch::Sender<Arc<CollectionSnapshot>>,
    updates: Listeners<CollectionSnapshot>,
    has_baseline: AtomicBool,
    resync_pending: AtomicBool,
    last_network_sync: Mutex<Option<ObservedAt>>,
    /// Serializes refreshes and remembers the last outcome.
    refresh_lock: tokio::sync::Mutex<Option<Outcome>>,
    refresh_generation: AtomicU64,
    /// Serializes persist-diff-publish between refreshes and pushes.
    apply_lock: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    /// Creates a coordinator. The initial snapshot is an empty stale cache
    /// snapshot until the first refresh completes.
    pub fn new(
        descriptor: ResourceDescriptor,
        config: SyncConfig,
        monitor: ConnectivityMonitor,
        store: Arc<dyn BoundedStore>,
        fetcher: TimedFetcher,
        notifier: Arc<dyn NotificationSink>,
    ) -> SyncResult<Self> {
        descriptor.validate()?;
        let request = FetchRequest::for_resource(&descriptor)?;
        let timeout = descriptor.timeout(&config);
        let (current, _) = watch::channel(Arc::new(CollectionSnapshot::default()));

        Ok(Self {
            descriptor,
            config,
            request,
            timeout,
            monitor,
            store,
            fetcher,
            notifier,
            clock: Mutex::new(ObservedAt::EPOCH),
            current,
            updates: Listeners::new(),
            has_baseline: AtomicBool::new(false),
            resync_pending: AtomicBool::new(false),
            last_network_sync: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
            apply_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Produces a snapshot from the network or, failing that, the store.
    ///
    /// A call that arrives while another refresh is running waits for it and
    /// returns its outcome instead of fetching again.
    pub async fn refresh(&self) -> SyncResult<CollectionSnapshot> {
        let ticket = self.refresh_generation.load(Ordering::SeqCst);
        let mut last = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::SeqCst) != ticket {
            if let Some(outcome) = last.as_ref() {
                debug!(resource = %self.descriptor.name, "joined in-flight refresh");
                return outcome.clone().into_result();
            }
        }
        self.refresh_locked(&mut last).await.into_result()
    }

    async fn refresh_locked(&self, last: &mut Option<Outcome>) -> Outcome {
        let outcome = self.run_refresh().await;
        *last = Some(outcome.clone());
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn run_refresh(&self) -> Outcome {
        let resource = &self.descriptor.name;
        if self.monitor.current_state().is_online() {
            match self.fetcher.fetch(&self.request, self.timeout).await {
                Ok(snapshot) => {
                    let (published, stamp) = self.apply(snapshot, false).await;
                    self.resync_pending.store(false, Ordering::SeqCst);
                    *self
                        .last_network_sync
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(stamp);
                    return Outcome::Published(published);
                }
                Err(e) if e.is_timeout() => {
                    info!(%resource, "fetch timed out, falling back to cache");
                }
                Err(e) => {
                    info!(%resource, "fetch failed, falling back to cache: {e}");
                }
            }
        } else {
            debug!(%resource, known = self.monitor.is_known(), "offline, reading cache");
        }

        self.resync_pending.store(true, Ordering::SeqCst);
        self.load_cache().await
    }

    async fn load_cache(&self) -> Outcome {
        let resource = &self.descriptor.name;
        let _guard = self.apply_lock.lock().await;
        match self.store.get_all().await {
            Ok(mut records) => {
                // Newest first; the sort is stable, so batch order survives
                // within a stamp.
                records.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
                let entities: Vec<Entity> = records.into_iter().map(Entity::from).collect();
                debug!(%resource, count = entities.len(), "serving cached snapshot");
                Outcome::Published(self.publish(CollectionSnapshot::cache(entities)))
            }
            Err(e) => {
                warn!(%resource, "store unavailable, no data to serve: {e}");
                self.publish(CollectionSnapshot::empty(SnapshotSource::Cache, true));
                Outcome::NoData
            }
        }
    }

    /// Stamps, persists, diffs and publishes a live snapshot.
    ///
    /// With `merge`, entities of the current snapshot that the new one does
    /// not mention are kept after the new ones, and a stale current snapshot
    /// keeps the result stale.
    async fn apply(
        &self,
        mut snapshot: CollectionSnapshot,
        merge: bool,
    ) -> (Arc<CollectionSnapshot>, ObservedAt) {
        let _guard = self.apply_lock.lock().await;
        let resource = &self.descriptor.name;

        let stamp = self.next_stamp();
        snapshot.stamp(stamp);

        match self.store.upsert_many(snapshot.to_records(stamp)).await {
            Ok(report) => debug!(
                %resource,
                written = report.written,
                evicted = report.evicted,
                "persisted snapshot"
            ),
            Err(e) => warn!(%resource, "failed to persist snapshot: {e}"),
        }

        let previous = self.current.borrow().clone();
        if merge {
            let incoming = snapshot.ids().into_iter().cloned().collect::<HashSet<_>>();
            let before = snapshot.len();
            snapshot.entities.extend(
                previous
                    .entities
                    .iter()
                    .filter(|e| !incoming.contains(&e.id))
                    .cloned(),
            );
            snapshot.is_stale = previous.is_stale && snapshot.len() > before;
        }
        let summary = ChangeDetector::diff(&previous, &snapshot);
        if summary.has_new() {
            if self.has_baseline.load(Ordering::SeqCst) {
                self.announce_new(&summary);
            } else {
                debug!(%resource, new = summary.new_count, "first load, not announcing");
            }
        }

        (self.publish(snapshot), stamp)
    }

    fn next_stamp(&self) -> ObservedAt {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        *clock = clock.tick();
        *clock
    }

    fn publish(&self, snapshot: CollectionSnapshot) -> Arc<CollectionSnapshot> {
        if !snapshot.is_empty() {
            self.has_baseline.store(true, Ordering::SeqCst);
        }
        let snapshot = Arc::new(snapshot);
        self.current.send_replace(Arc::clone(&snapshot));
        self.updates.emit(&snapshot);
        snapshot
    }

    fn announce_new(&self, summary: &ChangeSummary) {
        let title = format!("{} new {}", summary.new_count, self.descriptor.label());
        let body = summary
            .newest
            .as_ref()
            .map(|entity| {
                self.descriptor
                    .notify_field
                    .as_deref()
                    .and_then(|field| entity.payload_str(field))
                    .unwrap_or(entity.id.as_str())
                    .to_owned()
            })
            .unwrap_or_default();
        self.deliver(&title, &body);
    }

    fn deliver(&self, title: &str, body: &str) {
        if !self.notifier.is_permitted() {
            debug!(resource = %self.descriptor.name, %title, "notification suppressed, not permitted");
            return;
        }
        info!(resource = %self.descriptor.name, %title, "notifying");
        self.notifier.notify(title, body);
    }

    /// Reacts to a connectivity transition.
    ///
    /// On reconnect with a resync pending, runs one fresh refresh that does
    /// not join any earlier in-flight refresh, and announces the resync if it
    /// reached the network.
    pub async fn handle_transition(&self, transition: ConnectivityTransition) {
        if !transition.is_reconnect() || !self.resync_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(resource = %self.descriptor.name, "back online, resyncing");

        let outcome = {
            let mut last = self.refresh_lock.lock().await;
            self.refresh_locked(&mut last).await
        };
        if let Outcome::Published(snapshot) = outcome {
            if snapshot.source == SnapshotSource::Network {
                let body = format!("{} data resynced", self.descriptor.label());
                self.deliver("Back online", &body);
            }
        }
    }

    /// Accepts a snapshot from the push feed.
    ///
    /// Pushed entities are merged over the current snapshot rather than
    /// replacing it; only the pushed entities are persisted.
    pub async fn on_push(&self, snapshot: CollectionSnapshot) {
        let snapshot = CollectionSnapshot::push(snapshot.entities);
        self.apply(snapshot, true).await;
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<CollectionSnapshot> {
        self.current.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        let current = self.current.borrow();
        SyncStatus {
            is_stale: current.is_stale,
            source: current.source,
            last_network_sync: *self
                .last_network_sync
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Whether a reconnect will trigger a resync.
    pub fn resync_pending(&self) -> bool {
        self.resync_pending.load(Ordering::SeqCst)
    }

    /// Registers a callback invoked with every published snapshot.
    pub fn on_update(
        &self,
        listener: impl Fn(&CollectionSnapshot) + Send + Sync + 'static,
    ) -> ListenerId {
        self.updates.add(listener)
    }

    pub fn remove_update_listener(&self, id: ListenerId) -> bool {
        self.updates.remove(id)
    }

    /// Watches the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<CollectionSnapshot>> {
        self.current.subscribe()
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("resource", &self.descriptor.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PushHandler for SyncCoordinator {
    async fn on_push(&self, snapshot: CollectionSnapshot) {
        SyncCoordinator::on_push(self, snapshot).await;
    }
}
