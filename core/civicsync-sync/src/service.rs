//! Wiring of one resource's background activity.

use crate::channel::{PushConnector, PushHandler, ReconnectingChannel};
use crate::coordinator::SyncCoordinator;
use crate::listeners::ListenerId;
use crate::reconnect::ReconnectPolicy;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Runs a coordinator's connectivity reactions, polling and push feed.
pub struct ResourceSync {
    coordinator: Arc<SyncCoordinator>,
    channel: Option<ReconnectingChannel>,
    listener: Mutex<Option<ListenerId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceSync {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            channel: None,
            listener: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attaches a push channel to the resource's push URL.
    ///
    /// Resources without a push URL are left poll-only.
    pub fn with_push(
        mut self,
        connector: Arc<dyn PushConnector>,
        policy: Arc<dyn ReconnectPolicy>,
    ) -> Self {
        let descriptor = self.coordinator.descriptor();
        match &descriptor.push_url {
            Some(url) => {
                let handler: Arc<dyn PushHandler> = self.coordinator.clone();
                let channel = ReconnectingChannel::new(url.clone(), connector, policy, handler)
                    .with_init_message(self.coordinator.config().init_message.clone());
                self.channel = Some(channel);
            }
            None => debug!(resource = %descriptor.name, "no push url, push disabled"),
        }
        self
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn channel(&self) -> Option<&ReconnectingChannel> {
        self.channel.as_ref()
    }

    /// Starts background activity. Calling it twice does nothing.
    pub fn start(&self) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let resource = self.coordinator.descriptor().name.clone();

        // Listeners run synchronously inside `signal`, so transitions are
        // handed to a task that can await the coordinator.
        let (tx, mut rx) = mpsc::unbounded_channel();
        *listener = Some(self.coordinator.monitor().on_change(move |t| {
            let _ = tx.send(*t);
        }));
        let coordinator = Arc::clone(&self.coordinator);
        tasks.push(tokio::spawn(async move {
            while let Some(transition) = rx.recv().await {
                coordinator.handle_transition(transition).await;
            }
        }));

        if let Some(interval) = self.coordinator.descriptor().poll_interval() {
            let coordinator = Arc::clone(&self.coordinator);
            let resource = resource.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = coordinator.refresh().await {
                        warn!(%resource, "scheduled refresh failed: {e}");
                    }
                }
            }));
        }

        if let Some(channel) = &self.channel {
            channel.start();
        }
        info!(%resource, push = self.channel.is_some(), "resource sync started");
    }

    /// Stops everything started by [`start`](Self::start).
    pub async fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = listener {
            self.coordinator.monitor().remove_listener(id);
        }
        if let Some(channel) = &self.channel {
            channel.stop().await;
        }
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        info!(resource = %self.coordinator.descriptor().name, "resource sync stopped");
    }
}

impl std::fmt::Debug for ResourceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSync")
            .field("coordinator", &self.coordinator)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
