//! Error types for the sync layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
///
/// Only [`SyncError::NoDataAvailable`] ever reaches callers of
/// `SyncCoordinator::refresh`; everything else is recovered inside the
/// coordinator and turned into snapshot metadata.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Neither the network nor the store could produce a snapshot.
    #[error("no data available: network unreachable and no cached copy")]
    NoDataAvailable,

    /// A push frame could not be decoded.
    #[error("malformed push message: {0}")]
    MalformedPush(String),

    /// Invalid resource descriptor or configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

/// Why a request/response exchange failed below the schema level.
#[derive(Debug, Error)]
pub enum NetworkCause {
    /// DNS, connect, TLS or body read failure.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The body did not match the collection schema.
    #[error("schema: {0}")]
    Schema(#[from] civicsync_types::Error),

    /// Any other transport failure (used by non-HTTP exchanges).
    #[error("{0}")]
    Other(String),
}

/// Outcome classification of a failed fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The exchange did not complete in time and was cancelled.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The exchange failed or returned unusable data.
    #[error("fetch failed: {0}")]
    Network(#[from] NetworkCause),
}

impl FetchError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
