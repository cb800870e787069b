use crate::{
    api::{error::ApiError, response::ApiResponse},
    cache::{CacheStats, MemoryStats},
    db::store,
    metrics::MetricsSnapshot,
    models::ChainInfo,
    state::AppState,
};
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Serialize)]
struct MemoryStatusView {
    memory: MemoryStats,
    cache: CacheStats,
}

#[derive(Serialize)]
struct BatchStatusView {
    chain: Option<ChainInfo>,
    metrics: MetricsSnapshot,
}

// Operational surface of the batch pipeline. The entity CRUD endpoints
// live elsewhere; only batch control and introspection belong here.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/batch/start", post(start_batch))
        .route("/batch/stop", post(stop_batch))
        .route("/batch/status", get(batch_status))
        .route("/batch/memory-status", get(memory_status))
        .route("/batch/cache-cleanup", post(cache_cleanup))
        .with_state(app_state)
}

/// POST /batch/start — launch one batch asynchronously unless one is
/// already in flight.
async fn start_batch(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    info!("Manual batch processing start requested");

    if state.processor.is_running() {
        return Err(ApiError::BadRequest(
            "Batch processing is already running".to_string(),
        ));
    }

    let processor = state.processor.clone();
    tokio::spawn(async move {
        if let Err(e) = processor.process_batch().await {
            error!("Error in manual batch processing: {}", e);
        }
    });

    Ok(ApiResponse::message("Batch processing started").into_response())
}

/// POST /batch/stop — flag the active batch to stop at the next phase
/// boundary.
async fn stop_batch(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    info!("Manual batch processing stop requested");

    if !state.processor.is_running() {
        return Err(ApiError::BadRequest(
            "No batch processing is currently running".to_string(),
        ));
    }

    state.processor.request_stop();
    Ok(ApiResponse::message("Stop request sent to batch processor").into_response())
}

/// GET /batch/status — metrics snapshot (including cache stats) plus the
/// persisted chain row with its high-water mark.
async fn batch_status(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let chain = store::load_chain_by_external_id(&state.db_pool, &state.config.chain_id).await?;
    let view = BatchStatusView {
        chain,
        metrics: state.processor.metrics_snapshot(),
    };
    Ok(ApiResponse::success(view).into_response())
}

/// GET /batch/memory-status — estimated cache footprint against its budget.
async fn memory_status(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let view = MemoryStatusView {
        memory: state.cache.memory_stats(),
        cache: state.cache.stats_snapshot(),
    };
    Ok(ApiResponse::success(view).into_response())
}

/// POST /batch/cache-cleanup — force one decay-and-evict pass and report
/// the resulting cache state.
async fn cache_cleanup(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    state.cache.decay_and_evict();
    let view = MemoryStatusView {
        memory: state.cache.memory_stats(),
        cache: state.cache.stats_snapshot(),
    };
    Ok(ApiResponse::success(view).into_response())
}
