//! HTTP request handlers.
//!
//! - `api`: raster, time series, vector and field info
//! - `cache`: local working set and result cache administration
//! - `metrics`: health checks, Prometheus and JSON metrics

pub mod api;
pub mod cache;
pub mod metrics;

pub use api::{info_handler, raster_handler, timeseries_handler, vector_handler};
pub use cache::{
    clear_local_handler, clear_results_handler, delete_result_handler, list_local_handler,
    list_results_handler,
};
pub use metrics::{api_metrics_handler, health_handler, metrics_handler};
