//! HTTP API and connectivity probe for the civicsync agent.

pub mod probe;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use civicsync_sync::{CollectionSnapshot, ObservedAt, SnapshotSource, SyncCoordinator, SyncError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StatusResponse {
    pub resource: String,
    pub is_stale: bool,
    pub source: SnapshotSource,
    pub last_network_sync: Option<ObservedAt>,
    pub entity_count: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

async fn status_handler(State(coordinator): State<Arc<SyncCoordinator>>) -> Json<StatusResponse> {
    let status = coordinator.status();
    Json(StatusResponse {
        resource: coordinator.descriptor().name.clone(),
        is_stale: status.is_stale,
        source: status.source,
        last_network_sync: status.last_network_sync,
        entity_count: coordinator.current().len(),
    })
}

async fn snapshot_handler(
    State(coordinator): State<Arc<SyncCoordinator>>,
) -> Json<CollectionSnapshot> {
    Json((*coordinator.current()).clone())
}

async fn refresh_handler(
    State(coordinator): State<Arc<SyncCoordinator>>,
) -> Result<Json<CollectionSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    match coordinator.refresh().await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            warn!("refresh requested over HTTP failed: {e}");
            let status = match e {
                SyncError::NoDataAvailable => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, Json(ErrorResponse { error: e.to_string() })))
        }
    }
}

/// Build the HTTP API router over one coordinator.
pub fn build_router(coordinator: Arc<SyncCoordinator>) -> Router {
    Router::new()
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/snapshot", get(snapshot_handler))
        .route("/api/v1/refresh", post(refresh_handler))
        .with_state(coordinator)
}
