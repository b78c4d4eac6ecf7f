//! Artifact and field info endpoints.

use axum::{
    extract::{Extension, Query},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

use i2o_common::{FieldDescriptor, RequestParams};

use crate::error::ApiResult;
use crate::service::Artifact;
use crate::state::AppState;

type QueryPairs = Query<Vec<(String, String)>>;

/// GET /api/raster?param=&year=&month=&day=&cmap=
#[instrument(skip(state, pairs))]
pub async fn raster_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): QueryPairs,
) -> ApiResult<Response> {
    let artifact = state.raster(RequestParams::from_query(pairs)).await?;
    Ok(artifact_response(artifact))
}

/// GET /api/timeseries?table=&mascon=&version=&region=&location=&glacier=
#[instrument(skip(state, pairs))]
pub async fn timeseries_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): QueryPairs,
) -> ApiResult<Response> {
    let artifact = state.timeseries(RequestParams::from_query(pairs)).await?;
    Ok(artifact_response(artifact))
}

/// GET /api/vector?table=&name=
#[instrument(skip(state, pairs))]
pub async fn vector_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): QueryPairs,
) -> ApiResult<Response> {
    let artifact = state.vector(RequestParams::from_query(pairs)).await?;
    Ok(artifact_response(artifact))
}

/// GET /api/info[?param=]
pub async fn info_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): QueryPairs,
) -> ApiResult<Json<Vec<FieldDescriptor>>> {
    let params = RequestParams::from_query(pairs);
    let param = params.optional_str("param");
    Ok(Json(state.info(param.as_deref())?))
}

fn artifact_response(artifact: Artifact) -> Response {
    let cache_status = if artifact.cache_hit { "HIT" } else { "MISS" };
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(artifact.content_type)),
            (header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600")),
            (
                header::HeaderName::from_static("x-cache"),
                HeaderValue::from_static(cache_status),
            ),
        ],
        artifact.bytes,
    )
        .into_response()
}
