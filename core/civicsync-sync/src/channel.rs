//! Push channel with automatic reconnection.
//!
//! The channel is a small state machine owned by one spawned task:
//!
//! ```text
//! Idle -> Connecting -> Open -> Closed -> (delay) -> Connecting -> ...
//! ```
//!
//! Every wait in the loop (connect, read, reconnect delay) is raced against
//! the stop signal, so [`ReconnectingChannel::stop`] cancels whatever the
//! task is doing and no reconnection happens afterwards.

use crate::error::{SyncError, SyncResult};
use crate::listeners::{ListenerId, Listeners};
use crate::reconnect::ReconnectPolicy;
use async_trait::async_trait;
use civicsync_types::{decode_collection, CollectionSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Status reported to `on_status` listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Connecting,
    Open,
    Closed,
}

impl ChannelState {
    fn status(self) -> Option<ChannelStatus> {
        match self {
            Self::Idle => None,
            Self::Connecting => Some(ChannelStatus::Connecting),
            Self::Open => Some(ChannelStatus::Open),
            Self::Closed => Some(ChannelStatus::Closed),
        }
    }
}

/// Receives decoded push snapshots.
#[async_trait]
pub trait PushHandler: Send + Sync {
    async fn on_push(&self, snapshot: CollectionSnapshot);
}

/// One open push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Sends a text frame.
    async fn send(&mut self, text: String) -> SyncResult<()>;

    /// Next text frame; `None` once the server has closed the connection.
    async fn recv(&mut self) -> Option<SyncResult<String>>;
}

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> SyncResult<Box<dyn PushConnection>>;
}

/// Decodes a push frame into a `push` snapshot.
pub fn decode_push(text: &str) -> SyncResult<CollectionSnapshot> {
    decode_collection(text.as_bytes())
        .map(CollectionSnapshot::push)
        .map_err(|e| SyncError::MalformedPush(e.to_string()))
}

struct Shared {
    state: Mutex<ChannelState>,
    status: Listeners<ChannelStatus>,
    reconnect_attempts: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return;
        }
        debug!(from = ?previous, to = ?next, "push channel state");
        if let Some(status) = next.status() {
            self.status.emit(&status);
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the channel task needs, cloned out of the channel on start.
struct Worker {
    url: String,
    init_message: String,
    connector: Arc<dyn PushConnector>,
    policy: Arc<dyn ReconnectPolicy>,
    handler: Arc<dyn PushHandler>,
    shared: Arc<Shared>,
}

enum ReadEnd {
    Stopped,
    Disconnected,
}

impl Worker {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            self.shared.set_state(ChannelState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = stop.changed() => return,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(mut connection) => {
                    attempt = 0;
                    self.shared.set_state(ChannelState::Open);
                    info!(url = %self.url, "push channel open");
                    if let ReadEnd::Stopped = self.serve(&mut *connection, &mut stop).await {
                        return;
                    }
                }
                Err(e) => warn!(url = %self.url, "push connect failed: {e}"),
            }

            self.shared.set_state(ChannelState::Closed);
            attempt = attempt.saturating_add(1);
            let delay = self.policy.delay(attempt);
            debug!(url = %self.url, attempt, ?delay, "push reconnect scheduled");
            tokio::select! {
                biased;
                _ = stop.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            self.shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn serve(
        &self,
        connection: &mut dyn PushConnection,
        stop: &mut watch::Receiver<bool>,
    ) -> ReadEnd {
        let sent = tokio::select! {
            biased;
            _ = stop.changed() => return ReadEnd::Stopped,
            sent = connection.send(self.init_message.clone()) => sent,
        };
        if let Err(e) = sent {
            warn!(url = %self.url, "failed to send init message: {e}");
            return ReadEnd::Disconnected;
        }

        loop {
            let frame = tokio::select! {
                biased;
                _ = stop.changed() => return ReadEnd::Stopped,
                frame = connection.recv() => frame,
            };
            match frame {
                Some(Ok(text)) => match decode_push(&text) {
                    Ok(snapshot) => {
                        debug!(url = %self.url, count = snapshot.len(), "push received");
                        self.handler.on_push(snapshot).await;
                    }
                    Err(e) => warn!(url = %self.url, "dropping push frame: {e}"),
                },
                Some(Err(e)) => {
                    warn!(url = %self.url, "push channel error: {e}");
                    return ReadEnd::Disconnected;
                }
                None => {
                    info!(url = %self.url, "push channel closed by server");
                    return ReadEnd::Disconnected;
                }
            }
        }
    }
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A push feed that reconnects until stopped.
pub struct ReconnectingChannel {
    url: String,
    init_message: Value,
    connector: Arc<dyn PushConnector>,
    policy: Arc<dyn ReconnectPolicy>,
    handler: Arc<dyn PushHandler>,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl ReconnectingChannel {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn PushConnector>,
        policy: Arc<dyn ReconnectPolicy>,
        handler: Arc<dyn PushHandler>,
    ) -> Self {
        Self {
            url: url.into(),
            init_message: json!({ "type": "INIT" }),
            connector,
            policy,
            handler,
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState::Idle),
                status: Listeners::new(),
                reconnect_attempts: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// Replaces the message sent after each successful handshake.
    pub fn with_init_message(mut self, message: Value) -> Self {
        self.init_message = message;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Starts the channel task. Does nothing if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let worker = Worker {
            url: self.url.clone(),
            init_message: self.init_message.to_string(),
            connector: Arc::clone(&self.connector),
            policy: Arc::clone(&self.policy),
            handler: Arc::clone(&self.handler),
            shared: Arc::clone(&self.shared),
        };
        self.shared.set_state(ChannelState::Connecting);
        let handle = tokio::spawn(worker.run(stop_rx));
        *running = Some(Running { stop, handle });
    }

    /// Stops the channel and waits for its task to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { stop, handle }) = running {
            let _ = stop.send(true);
            if let Err(e) = handle.await {
                warn!(url = %self.url, "push channel task ended abnormally: {e}");
            }
            info!(url = %self.url, "push channel stopped");
        }
        self.shared.set_state(ChannelState::Idle);
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Number of reconnection attempts made since the channel was created.
    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Registers a status listener.
    pub fn on_status(
        &self,
        listener: impl Fn(&ChannelStatus) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.status.add(listener)
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        self.shared.status.remove(id)
    }
}

impl std::fmt::Debug for ReconnectingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingChannel")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

/// In-memory push transport for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// What the next connection attempt does.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MockOutcome {
        Refuse,
        Accept,
    }

    /// A connector that follows a script and hands each accepted
    /// connection's server side to the test as a [`MockPeer`].
    #[derive(Debug)]
    pub struct MockConnector {
        script: Mutex<VecDeque<MockOutcome>>,
        fallback: Mutex<MockOutcome>,
        connects: Mutex<Vec<Instant>>,
        peers: mpsc::UnboundedSender<MockPeer>,
    }

    impl MockConnector {
        /// Creates a connector that refuses once its script is exhausted.
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
            let (peers, peers_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(MockOutcome::Refuse),
                connects: Mutex::new(Vec::new()),
                peers,
            });
            (connector, peers_rx)
        }

        pub fn push(&self, outcome: MockOutcome) {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(outcome);
        }

        pub fn set_fallback(&self, outcome: MockOutcome) {
            *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
        }

        /// Number of connection attempts so far.
        pub fn attempts(&self) -> usize {
            self.connects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// When each attempt started.
        pub fn connect_times(&self) -> Vec<Instant> {
            self.connects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl PushConnector for MockConnector {
        async fn connect(&self, _url: &str) -> SyncResult<Box<dyn PushConnection>> {
            self.connects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Instant::now());
            let next = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let outcome =
                next.unwrap_or(*self.fallback.lock().unwrap_or_else(PoisonError::into_inner));

            match outcome {
                MockOutcome::Refuse => Err(SyncError::Network("connection refused".into())),
                MockOutcome::Accept => {
                    let (to_client, incoming) = mpsc::unbounded_channel();
                    let (outgoing, from_client) = mpsc::unbounded_channel();
                    let peer = MockPeer {
                        to_client: Some(to_client),
                        from_client,
                    };
                    self.peers
                        .send(peer)
                        .map_err(|_| SyncError::ChannelClosed)?;
                    Ok(Box::new(MockConnection { incoming, outgoing }))
                }
            }
        }
    }

    struct MockConnection {
        incoming: mpsc::UnboundedReceiver<SyncResult<String>>,
        outgoing: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl PushConnection for MockConnection {
        async fn send(&mut self, text: String) -> SyncResult<()> {
            self.outgoing
                .send(text)
                .map_err(|_| SyncError::ChannelClosed)
        }

        async fn recv(&mut self) -> Option<SyncResult<String>> {
            self.incoming.recv().await
        }
    }

    /// The server side of an accepted mock connection.
    #[derive(Debug)]
    pub struct MockPeer {
        to_client: Option<mpsc::UnboundedSender<SyncResult<String>>>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl MockPeer {
        /// Sends a text frame; false if the connection is gone.
        pub fn send_frame(&self, text: impl Into<String>) -> bool {
            self.to_client
                .as_ref()
                .is_some_and(|tx| tx.send(Ok(text.into())).is_ok())
        }

        /// Fails the connection with a transport error.
        pub fn fail(&mut self, reason: &str) {
            if let Some(tx) = self.to_client.take() {
                let _ = tx.send(Err(SyncError::Network(reason.to_owned())));
            }
        }

        /// Closes the connection from the server side.
        pub fn close(&mut self) {
            self.to_client = None;
        }

        /// Waits for the next frame the client sent.
        pub async fn next_sent(&mut self) -> Option<String> {
            self.from_client.recv().await
        }

        /// Frames the client has sent and that were not yet read.
        pub fn received(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.from_client.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }
}
