//! Ice2Ocean HTTP API: cached rasters, time series and vector geometries over
//! remote model output.
//!
//! Dated fields are NetCDF and need the `netcdf` feature
//! (`cargo build --features netcdf`). Without it their raster requests are
//! refused before anything is downloaded.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod plot;
pub mod query;
pub mod service;
pub mod state;

use axum::{
    extract::Extension,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub use config::ApiConfig;
pub use state::{AppState, Collaborators};

/// All routes, with shared state attached.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/raster", get(handlers::raster_handler))
        .route("/api/timeseries", get(handlers::timeseries_handler))
        .route("/api/vector", get(handlers::vector_handler))
        .route("/api/info", get(handlers::info_handler))
        .route("/api/cache/local", get(handlers::list_local_handler))
        .route("/api/cache/local/clear", post(handlers::clear_local_handler))
        .route("/api/cache/results", get(handlers::list_results_handler))
        .route("/api/cache/results/clear", post(handlers::clear_results_handler))
        .route("/api/cache/results/:key", delete(handlers::delete_result_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/metrics", get(handlers::api_metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
