//! Timed request/response fetching.
//!
//! [`TimedFetcher`] races one [`Exchange`] against a timer. When the timer
//! wins, the exchange future is dropped, which cancels the request in
//! flight. Responses are validated into entities here, at the boundary, so
//! nothing downstream sees an unchecked server shape.

use crate::config::ResourceDescriptor;
use crate::error::{FetchError, NetworkCause, SyncError, SyncResult};
use async_trait::async_trait;
use civicsync_types::{decode_collection, CollectionSnapshot};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One collection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Builds the request for a resource's collection endpoint.
    pub fn for_resource(descriptor: &ResourceDescriptor) -> SyncResult<Self> {
        Ok(Self::new(descriptor.endpoint_url()?))
    }
}

/// A single request/response exchange returning the raw body.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, request: &FetchRequest) -> Result<Vec<u8>, NetworkCause>;
}

/// HTTP `GET` exchange.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    client: Client,
}

impl HttpExchange {
    /// Creates an exchange with a fresh client.
    pub fn new() -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("civicsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Exchange for HttpExchange {
    async fn exchange(&self, request: &FetchRequest) -> Result<Vec<u8>, NetworkCause> {
        let response = self
            .client
            .get(request.url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkCause::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Performs exchanges under a timeout and classifies the outcome.
#[derive(Clone)]
pub struct TimedFetcher {
    exchange: Arc<dyn Exchange>,
}

impl TimedFetcher {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    /// A fetcher over plain HTTP.
    pub fn http() -> SyncResult<Self> {
        Ok(Self::new(Arc::new(HttpExchange::new()?)))
    }

    /// Fetches one collection.
    ///
    /// Safe to retry: a failed call has no effect beyond cancelling its own
    /// exchange.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        timeout: Duration,
    ) -> Result<CollectionSnapshot, FetchError> {
        let body = match tokio::time::timeout(timeout, self.exchange.exchange(request)).await {
            Ok(result) => result.inspect_err(|e| warn!(url = %request.url, "fetch failed: {e}"))?,
            Err(_) => {
                warn!(url = %request.url, ?timeout, "fetch timed out");
                return Err(FetchError::Timeout(timeout));
            }
        };

        let entities = decode_collection(&body).map_err(|e| {
            warn!(url = %request.url, "response rejected: {e}");
            NetworkCause::Schema(e)
        })?;
        debug!(url = %request.url, count = entities.len(), "fetched collection");
        Ok(CollectionSnapshot::network(entities))
    }
}

/// A scripted exchange for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// One scripted exchange outcome.
    #[derive(Debug, Clone)]
    pub enum Scripted {
        /// Respond with this body.
        Body(Vec<u8>),
        /// Respond with this body after a delay.
        Delayed(Duration, Vec<u8>),
        /// Fail with a transport error.
        Fail(String),
        /// Fail with an HTTP status.
        Status(u16),
        /// Never complete.
        Hang,
    }

    impl Scripted {
        /// A JSON body.
        pub fn json(value: serde_json::Value) -> Self {
            Self::Body(value.to_string().into_bytes())
        }
    }

    /// Plays back scripted outcomes in order, then repeats the fallback.
    #[derive(Debug)]
    pub struct ScriptedExchange {
        script: Mutex<VecDeque<Scripted>>,
        fallback: Mutex<Scripted>,
        calls: AtomicUsize,
    }

    impl ScriptedExchange {
        /// Creates an exchange whose fallback is a transport failure.
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(Scripted::Fail("no scripted response".into())),
                calls: AtomicUsize::new(0),
            }
        }

        /// Queues an outcome.
        pub fn push(&self, outcome: Scripted) {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(outcome);
        }

        /// Queues a JSON body.
        pub fn push_json(&self, value: serde_json::Value) {
            self.push(Scripted::json(value));
        }

        /// Sets the outcome used once the script is exhausted.
        pub fn set_fallback(&self, outcome: Scripted) {
            *self.fallback.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
        }

        /// Number of exchanges started.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Default for ScriptedExchange {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Exchange for ScriptedExchange {
        async fn exchange(&self, _request: &FetchRequest) -> Result<Vec<u8>, NetworkCause> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let outcome = match next {
                Some(outcome) => outcome,
                None => self
                    .fallback
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            };
            match outcome {
                Scripted::Body(body) => Ok(body),
                Scripted::Delayed(delay, body) => {
                    tokio::time::sleep(delay).await;
                    Ok(body)
                }
                Scripted::Fail(reason) => Err(NetworkCause::Other(reason)),
                Scripted::Status(code) => Err(NetworkCause::Status(code)),
                Scripted::Hang => std::future::pending().await,
            }
        }
    }
}
