//! Per-item processing: turn one raw upload into derived products.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

use i2o_common::{FieldDescriptor, FieldTable, GridShape, I2oError, I2oResult};
use storage::{GridData, LocalFile, LocalFileCache, NetCdfDataset, RemoteObjectStore};

/// A failed processing step, rendered as `"{step} failed. More details: {error}"`.
#[derive(Debug, Error)]
#[error("{step} failed. More details: {error}")]
pub struct StepError {
    pub step: &'static str,
    #[source]
    pub error: I2oError,
}

impl StepError {
    pub fn new(step: &'static str, error: I2oError) -> Self {
        Self { step, error }
    }
}

/// Extension for tagging a result with the step it belongs to.
pub trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T, StepError>;
}

impl<T> StepContext<T> for Result<T, I2oError> {
    fn step(self, step: &'static str) -> Result<T, StepError> {
        self.map_err(|e| StepError::new(step, e))
    }
}

/// Transforms one uploaded object. Returns the names of products written.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, name: &str) -> Result<Vec<String>, StepError>;
}

/// JSON summary written for every processed upload.
#[derive(Debug, Clone, Serialize)]
pub struct ProductSummary {
    pub source: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub kind: &'static str,
    /// NetCDF on-disk format
    pub format: Option<String>,
    /// Raw grids only
    pub values: Option<usize>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub processed_at: DateTime<Utc>,
}

/// Default processor: summarize each upload, and draw a PNG preview of raw
/// grids whose parameter has a known shape.
pub struct PreviewProcessor {
    uploads: Arc<LocalFileCache>,
    products: Arc<dyn RemoteObjectStore>,
    products_container: String,
    fields: Option<Arc<dyn FieldTable>>,
}

impl PreviewProcessor {
    pub fn new(
        uploads: Arc<LocalFileCache>,
        products: Arc<dyn RemoteObjectStore>,
        products_container: impl Into<String>,
        fields: Option<Arc<dyn FieldTable>>,
    ) -> Self {
        Self {
            uploads,
            products,
            products_container: products_container.into(),
            fields,
        }
    }

    async fn put(&self, name: String, data: Vec<u8>, content_type: &str) -> Result<String, StepError> {
        self.products
            .put(&self.products_container, &name, Bytes::from(data), content_type)
            .await
            .step("Writing products")?;
        Ok(name)
    }

    async fn preview(&self, stem: &str, grid: GridData) -> Result<Option<Vec<u8>>, StepError> {
        let Some(field) = self.fields.as_ref().and_then(|f| f.get(stem).ok()) else {
            return Ok(None);
        };
        let Some(shape) = field.grid else {
            return Ok(None);
        };

        let png = blocking(move || render_preview(&grid, &field, shape))
            .await
            .step("Rendering preview")?;
        Ok(Some(png))
    }
}

#[async_trait]
impl Processor for PreviewProcessor {
    #[instrument(skip(self))]
    async fn process(&self, name: &str) -> Result<Vec<String>, StepError> {
        let file = self.uploads.fetch(name).await.step("Fetching")?;
        let stem = name.split('.').next().unwrap_or(name).to_string();

        let (summary, grid) = blocking(move || summarize(&file)).await.step("Opening")?;
        let mut written = Vec::new();

        if let Some(grid) = grid {
            if let Some(png) = self.preview(&stem, grid).await? {
                written.push(self.put(format!("{}.png", stem), png, "image/png").await?);
            }
        }

        let json = serde_json::to_vec_pretty(&summary)
            .map_err(I2oError::from)
            .step("Writing products")?;
        written.push(
            self.put(format!("{}.summary.json", stem), json, "application/json")
                .await?,
        );

        info!(name, products = written.len(), "Processed upload");
        Ok(written)
    }
}

/// Run file or CPU heavy work off the async workers.
async fn blocking<T, F>(work: F) -> I2oResult<T>
where
    F: FnOnce() -> I2oResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| I2oError::internal(format!("blocking task failed: {}", e)))?
}

fn render_preview(grid: &GridData, field: &FieldDescriptor, shape: GridShape) -> I2oResult<Vec<u8>> {
    let slice = grid.slice(0, shape)?;
    let x: Vec<f64> = (0..shape.nx).map(|i| i as f64).collect();
    let y: Vec<f64> = (0..shape.ny).map(|i| i as f64).collect();
    renderer::plot_to_png(
        &x,
        &y,
        slice,
        field.color_min,
        field.color_max,
        &field.colormap,
    )
    .map_err(|e| I2oError::internal(e.to_string()))
}

fn summarize(file: &LocalFile) -> Result<(ProductSummary, Option<GridData>), I2oError> {
    let mut summary = ProductSummary {
        source: file.name.clone(),
        size_bytes: file.size_bytes,
        sha256: file.sha256.clone(),
        kind: "netcdf",
        format: None,
        values: None,
        min: None,
        max: None,
        processed_at: Utc::now(),
    };

    if file.name.ends_with(".dat") {
        let grid = GridData::open(&file.path)?;
        let range = renderer::gradient::finite_range(grid.values());
        summary.kind = "grid";
        summary.values = Some(grid.len());
        summary.min = range.map(|r| r.0);
        summary.max = range.map(|r| r.1);
        debug!(values = grid.len(), "Summarized raw grid");
        return Ok((summary, Some(grid)));
    }

    let dataset = NetCdfDataset::open(&file.path)?;
    summary.format = Some(format!("{:?}", dataset.format()));
    Ok((summary, None))
}
