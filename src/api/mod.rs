//! The update-feed HTTP surface consumed by the portal.
//!
//! Three routes, one consumer: `GET /updates` delivers the pending batch,
//! `POST /updates/{id}/finalize` acknowledges it, `GET /health` reports
//! per-network state so the portal can gate its consumption. This is the
//! feed wire surface, not a public API; the portal serves the world.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::AppError;
use crate::ports::store::{FeedPersistence, HostPersistence};
use crate::ports::syncer::Syncer;
use crate::store::{HostStore, UpdateFeed};
use crate::types::primitives::BatchId;
use crate::types::UpdateBatch;

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// One network's health sources.
pub struct NetworkHealth<P> {
    /// The network's host store.
    pub store: Arc<HostStore<P>>,
    /// The network's peer syncer.
    pub syncer: Arc<dyn Syncer>,
}

impl<P> std::fmt::Debug for NetworkHealth<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHealth").finish_non_exhaustive()
    }
}

/// Shared state behind the feed routes.
#[derive(Debug)]
pub struct ApiState<P> {
    /// The update feed.
    pub feed: Arc<UpdateFeed<P>>,
    /// Health sources per network.
    pub networks: Vec<NetworkHealth<P>>,
}

/// Per-network health report entry.
#[derive(Debug, Serialize)]
struct NetworkReport {
    network: String,
    height: u64,
    hosts: usize,
    online_hosts: usize,
    synced: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Feed-surface error: bad requests carry their message, everything else
/// is logged and hidden.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Internal(AppError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal(err) => {
                error!(error = %err, "Feed request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the feed router.
pub fn router<P>(state: Arc<ApiState<P>>) -> Router
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    Router::new()
        .route("/updates", get(recent_updates::<P>))
        .route("/updates/:id/finalize", post(finalize::<P>))
        .route("/health", get(health::<P>))
        .with_state(state)
}

/// Bind the listener and serve the feed until cancelled.
///
/// # Errors
/// Returns an error if the address cannot be bound.
pub async fn serve<P>(
    state: Arc<ApiState<P>>,
    listen: &str,
    token: CancellationToken,
) -> crate::error::Result<()>
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| AppError::Initialization(format!("bind {listen}: {e}")))?;
    info!(listen, "Update feed listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .map_err(|e| AppError::Initialization(format!("feed listener: {e}")))
}

async fn recent_updates<P>(
    State(state): State<Arc<ApiState<P>>>,
) -> Result<Json<UpdateBatch>, ApiError>
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    Ok(Json(state.feed.recent_updates().await?))
}

async fn finalize<P>(
    State(state): State<Arc<ApiState<P>>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError>
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    let id = BatchId::from_hex(&id)
        .map_err(|e| ApiError::BadRequest(format!("invalid batch id: {e}")))?;
    let finalized = state.feed.finalize(id).await?;
    Ok(Json(json!({ "finalized": finalized })))
}

async fn health<P>(State(state): State<Arc<ApiState<P>>>) -> Json<serde_json::Value>
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    let mut networks = Vec::with_capacity(state.networks.len());
    for entry in &state.networks {
        let height = entry
            .store
            .tip()
            .await
            .ok()
            .flatten()
            .map_or(0, |tip| tip.height);
        networks.push(NetworkReport {
            network: entry.store.network().to_string(),
            height,
            hosts: entry.store.host_count().await,
            online_hosts: entry.store.online_count().await,
            synced: entry.syncer.is_synced().await,
        });
    }
    Json(json!({ "networks": networks }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
