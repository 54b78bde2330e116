//! TCP reachability probe feeding the connectivity monitor.

use civicsync_sync::{ConnectivityMonitor, ConnectivityState, ResourceDescriptor, SyncError, SyncResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Host and port probed for a resource: its endpoint's authority.
pub fn probe_target(descriptor: &ResourceDescriptor) -> SyncResult<(String, u16)> {
    let url = descriptor.endpoint_url()?;
    let host = url
        .host_str()
        .ok_or_else(|| SyncError::InvalidConfig(format!("endpoint `{url}` has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SyncError::InvalidConfig(format!("endpoint `{url}` has no port")))?;
    Ok((host.to_owned(), port))
}

/// Whether a TCP connection to `host:port` opens within `timeout`.
pub async fn probe_once(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Probes `host:port` once and signals the result to `monitor`.
///
/// Run before the first refresh so that it sees a known state.
pub async fn probe_and_signal(
    monitor: &ConnectivityMonitor,
    host: &str,
    port: u16,
    timeout: Duration,
) -> ConnectivityState {
    let reachable = probe_once(host, port, timeout).await;
    debug!(%host, port, reachable, "reachability probe");
    let state = if reachable {
        ConnectivityState::Online
    } else {
        ConnectivityState::Offline
    };
    monitor.signal(state);
    state
}

/// Probes `host:port` every `interval` and signals the result.
///
/// The first probe runs immediately.
pub fn spawn_probe(
    monitor: ConnectivityMonitor,
    host: String,
    port: u16,
    interval: Duration,
) -> JoinHandle<()> {
    let timeout = interval.min(Duration::from_secs(5));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_and_signal(&monitor, &host, port, timeout).await;
        }
    })
}
