//! Cache administration handlers.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

use storage::{CacheEntry, LocalFileInfo};

use crate::error::ApiResult;
use crate::service::ClearOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    /// Evict files smaller than this many bytes
    pub size: Option<u64>,
}

/// GET /api/cache/local
pub async fn list_local_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<Vec<LocalFileInfo>>> {
    Ok(Json(state.local_files().await?))
}

/// POST /api/cache/local/clear?size=N
#[instrument(skip(state))]
pub async fn clear_local_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ClearParams>,
) -> ApiResult<Json<ClearOutcome>> {
    let outcome = state.clear_local(params.size).await?;
    info!(removed = outcome.removed, "Cleared local files");
    Ok(Json(outcome))
}

/// GET /api/cache/results
pub async fn list_results_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<Vec<CacheEntry>>> {
    Ok(Json(state.cached_results().await?))
}

/// POST /api/cache/results/clear
#[instrument(skip(state))]
pub async fn clear_results_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = state.clear_results().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// DELETE /api/cache/results/:key
#[instrument(skip(state))]
pub async fn delete_result_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    state.invalidate_result(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
