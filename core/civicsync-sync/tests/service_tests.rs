use civicsync_storage::{SqliteRecordStore, StoreConfig};
use civicsync_sync::channel::mock::{MockConnector, MockOutcome};
use civicsync_sync::fetcher::mock::{Scripted, ScriptedExchange};
use civicsync_sync::notify::mock::RecordingNotifier;
use civicsync_sync::{
    ChannelState, ConnectivityMonitor, FixedDelay, ResourceDescriptor, ResourceSync,
    SnapshotSource, SyncConfig, SyncCoordinator, TimedFetcher,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    sync: ResourceSync,
    exchange: Arc<ScriptedExchange>,
    notifier: Arc<RecordingNotifier>,
    monitor: ConnectivityMonitor,
}

fn fixture(descriptor: ResourceDescriptor) -> Fixture {
    let exchange = Arc::new(ScriptedExchange::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let monitor = ConnectivityMonitor::new();
    let store = SqliteRecordStore::open_in_memory("devices", StoreConfig::default()).unwrap();
    let coordinator = SyncCoordinator::new(
        descriptor,
        SyncConfig::default(),
        monitor.clone(),
        Arc::new(store),
        TimedFetcher::new(exchange.clone()),
        notifier.clone(),
    )
    .unwrap();
    Fixture {
        sync: ResourceSync::new(Arc::new(coordinator)),
        exchange,
        notifier,
        monitor,
    }
}

fn descriptor() -> ResourceDescriptor {
    ResourceDescriptor::new("devices", "http://live.test/api/devices").with_label("Devices")
}

/// Polls `check` on the virtual clock until it holds or a minute passes.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..600 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

// ── Connectivity ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_resync() {
    let f = fixture(descriptor());
    f.sync.start();

    f.sync.coordinator().refresh().await.unwrap();
    assert!(f.sync.coordinator().resync_pending());

    f.exchange.push_json(json!([{ "id": "d1" }]));
    f.monitor.set_online();

    assert!(eventually(|| f.notifier.count() == 1).await);
    assert_eq!(f.notifier.shown()[0].0, "Back online");
    assert_eq!(f.sync.coordinator().current().source, SnapshotSource::Network);
    f.sync.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_detaches_from_monitor() {
    let f = fixture(descriptor());
    f.sync.start();
    f.sync.coordinator().refresh().await.unwrap();
    f.sync.shutdown().await;

    f.exchange.push_json(json!([{ "id": "d1" }]));
    f.monitor.set_online();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(f.exchange.calls(), 0);
    assert!(f.sync.coordinator().resync_pending());
}

// ── Polling ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn polls_at_interval() {
    let f = fixture(descriptor().with_poll_interval_ms(1_000));
    f.exchange.set_fallback(Scripted::json(json!([{ "id": "d1" }])));
    f.monitor.set_online();

    f.sync.start();
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    assert_eq!(f.exchange.calls(), 4);
    f.sync.shutdown().await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(f.exchange.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn no_poll_without_interval() {
    let f = fixture(descriptor());
    f.monitor.set_online();
    f.sync.start();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(f.exchange.calls(), 0);
    f.sync.shutdown().await;
}

// ── Push ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn push_feed_updates_coordinator() {
    let (connector, mut peers) = MockConnector::new();
    connector.push(MockOutcome::Accept);
    let f = fixture(descriptor().with_push_url("ws://live.test/feed"));
    let sync = f
        .sync
        .with_push(connector, Arc::new(FixedDelay::default()));
    sync.start();

    let mut peer = peers.recv().await.unwrap();
    assert!(peer.next_sent().await.unwrap().contains("INIT"));
    peer.send_frame(json!([{ "id": "d1" }, { "id": "d2" }]).to_string());

    let coordinator = Arc::clone(sync.coordinator());
    assert!(eventually(|| coordinator.current().source == SnapshotSource::Push).await);
    assert_eq!(coordinator.current().len(), 2);

    sync.shutdown().await;
    assert_eq!(sync.channel().unwrap().state(), ChannelState::Idle);
}

#[test]
fn push_needs_a_push_url() {
    let (connector, _peers) = MockConnector::new();
    let f = fixture(descriptor());
    let sync = f.sync.with_push(connector, Arc::new(FixedDelay::default()));
    assert!(sync.channel().is_none());
}
