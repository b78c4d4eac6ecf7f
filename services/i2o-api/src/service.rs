//! Request operations, independent of HTTP.
//!
//! Every artifact endpoint follows the same path: validate parameters,
//! fingerprint them, then serve from the result cache or compute and store.

use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use i2o_common::{
    extract_time, DatasetLayout, DatasetTime, FieldDescriptor, I2oError, I2oResult, RequestParams,
};
use storage::{
    scoped_fingerprint, CacheEntry, CacheKey, Cached, DatasetHandle, EvictionOutcome,
    LocalFileInfo, VariableData, NETCDF_SUPPORT,
};

use crate::metrics::ArtifactKind;
use crate::plot::PlotRequest;
use crate::query::{timeseries_query, vector_query, QueryRunner, SqlQuery};
use crate::state::AppState;

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const WKT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Bytes to send back, with their type and cache provenance.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub cache_hit: bool,
}

/// Per-file result of a local cache clear.
#[derive(Debug, Clone, Serialize)]
pub struct ClearOutcome {
    pub files: Vec<EvictionOutcome>,
    pub removed: usize,
}

/// A validated raster request.
struct RasterRequest {
    field: FieldDescriptor,
    time: Option<DatasetTime>,
    colormap: String,
}

impl AppState {
    /// Image of one parameter's field, optionally at a date.
    #[instrument(skip(self, params))]
    pub async fn raster(&self, params: RequestParams) -> I2oResult<Artifact> {
        let request = self.raster_request(&params)?;
        let key = scoped_fingerprint("raster", &params);
        let content_type = self.plotter.content_type();

        let cached = self
            .cached(ArtifactKind::Raster, &key, content_type, || {
                self.render_raster(request)
            })
            .await?;
        Ok(Artifact {
            bytes: cached.bytes,
            content_type,
            cache_hit: cached.hit,
        })
    }

    /// CSV time series from the relational store.
    #[instrument(skip(self, params))]
    pub async fn timeseries(&self, params: RequestParams) -> I2oResult<Artifact> {
        let query = timeseries_query(&params)?;
        let runner = self.query_runner()?;
        let key = scoped_fingerprint("timeseries", &params);

        let cached = self
            .cached(ArtifactKind::TimeSeries, &key, CSV_CONTENT_TYPE, || async move {
                let table = runner.fetch_table(&query).await?;
                Ok(Bytes::from(table.to_csv()))
            })
            .await?;
        Ok(Artifact {
            bytes: cached.bytes,
            content_type: CSV_CONTENT_TYPE,
            cache_hit: cached.hit,
        })
    }

    /// WKT geometries, one per line.
    #[instrument(skip(self, params))]
    pub async fn vector(&self, params: RequestParams) -> I2oResult<Artifact> {
        let query = vector_query(&params)?;
        let runner = self.query_runner()?;
        let key = scoped_fingerprint("vector", &params);

        let cached = self
            .cached(ArtifactKind::Vector, &key, WKT_CONTENT_TYPE, || {
                fetch_wkt(runner, query)
            })
            .await?;
        Ok(Artifact {
            bytes: cached.bytes,
            content_type: WKT_CONTENT_TYPE,
            cache_hit: cached.hit,
        })
    }

    /// One descriptor, or all of them when `param` is `None`.
    pub fn info(&self, param: Option<&str>) -> I2oResult<Vec<FieldDescriptor>> {
        match param {
            Some(p) => Ok(vec![self.fields.get(p)?]),
            None => Ok(self.fields.all()),
        }
    }

    pub async fn local_files(&self) -> I2oResult<Vec<LocalFileInfo>> {
        self.files.list_local().await
    }

    /// Evict local files smaller than `size` bytes, reporting on every file.
    /// Without a size nothing is removed.
    pub async fn clear_local(&self, size: Option<u64>) -> I2oResult<ClearOutcome> {
        let listing = self.files.list_local().await?;
        let evicted = match size {
            Some(threshold) => self.files.evict_smaller_than(threshold).await?,
            None => Vec::new(),
        };

        let files: Vec<EvictionOutcome> = listing
            .into_iter()
            .map(|file| {
                evicted
                    .iter()
                    .find(|e| e.name == file.name)
                    .cloned()
                    .unwrap_or(EvictionOutcome {
                        name: file.name,
                        size_bytes: file.size_bytes,
                        removed: false,
                        error: None,
                    })
            })
            .collect();
        let removed = files.iter().filter(|f| f.removed).count();
        Ok(ClearOutcome { files, removed })
    }

    pub async fn cached_results(&self) -> I2oResult<Vec<CacheEntry>> {
        self.results.entries().await
    }

    pub async fn clear_results(&self) -> I2oResult<usize> {
        self.results.clear().await
    }

    /// Remove one cached artifact. NotFound when it was not cached.
    pub async fn invalidate_result(&self, raw_key: &str) -> I2oResult<()> {
        let key = CacheKey::parse(raw_key)
            .ok_or_else(|| I2oError::invalid("key", format!("'{}' is not a cache key", raw_key)))?;
        if self.results.invalidate(&key).await? {
            Ok(())
        } else {
            Err(I2oError::NotFound(format!("cached result '{}'", raw_key)))
        }
    }

    async fn cached<F, Fut>(
        &self,
        kind: ArtifactKind,
        key: &CacheKey,
        content_type: &str,
        compute: F,
    ) -> I2oResult<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = I2oResult<Bytes>>,
    {
        self.metrics.record_request(kind);
        let cached = self.results.get_or_compute(key, content_type, compute).await?;
        if cached.hit {
            self.metrics.record_cache_hit(kind);
        } else {
            self.metrics.record_cache_miss(kind);
        }
        Ok(cached)
    }

    fn query_runner(&self) -> I2oResult<Arc<dyn QueryRunner>> {
        self.queries
            .clone()
            .ok_or_else(|| I2oError::unreachable("no relational database configured"))
    }

    fn raster_request(&self, params: &RequestParams) -> I2oResult<RasterRequest> {
        let param = params.required_str("param")?;
        let time = extract_time(params)?;
        let field = self.fields.get(&param)?;
        if field.layout == DatasetLayout::Dated {
            if time.is_none() {
                return Err(I2oError::MissingParameter("year, month, day".to_string()));
            }
            if !NETCDF_SUPPORT {
                return Err(I2oError::Unavailable {
                    name: field.name,
                    reason: "dated fields need a build with the `netcdf` feature".to_string(),
                });
            }
        }
        let colormap = params
            .optional_str("cmap")
            .unwrap_or_else(|| field.colormap.clone());
        Ok(RasterRequest {
            field,
            time,
            colormap,
        })
    }

    async fn render_raster(&self, request: RasterRequest) -> I2oResult<Bytes> {
        let started = Instant::now();
        let acquired = match request.time {
            Some(time) if request.field.layout == DatasetLayout::Dated => {
                self.datasets.acquire_dated(&request.field.name, time).await
            }
            _ => self.datasets.acquire_param(&request.field.name).await,
        };
        self.metrics
            .record_fetch(started.elapsed().as_micros() as u64, acquired.is_ok())
            .await;

        let plot = plot_request(&request, &acquired?)?;
        let plotter = self.plotter.clone();

        let started = Instant::now();
        let image = tokio::task::spawn_blocking(move || plotter.plot(&plot))
            .await
            .map_err(|e| I2oError::internal(format!("plot task failed: {}", e)))
            .and_then(|r| r);
        self.metrics
            .record_render(started.elapsed().as_micros() as u64, image.is_ok())
            .await;

        let image = image?;
        debug!(size = image.len(), "Rendered raster");
        Ok(Bytes::from(image))
    }
}

async fn fetch_wkt(runner: Arc<dyn QueryRunner>, query: SqlQuery) -> I2oResult<Bytes> {
    let table = runner.fetch_table(&query).await?;
    let mut body = String::new();
    for geometry in table.rows.iter().filter_map(|row| row.first().cloned().flatten()) {
        body.push_str(&geometry);
        body.push('\n');
    }
    if body.is_empty() {
        return Err(I2oError::NotFound("no matching geometry".to_string()));
    }
    Ok(Bytes::from(body))
}

fn plot_request(request: &RasterRequest, dataset: &DatasetHandle) -> I2oResult<PlotRequest> {
    let field = &request.field;
    let (x, y, values) = match dataset {
        DatasetHandle::Grid(grid) => {
            let shape = field.grid.ok_or_else(|| {
                I2oError::internal(format!("no grid shape configured for '{}'", field.name))
            })?;
            // Negative values are fill; only the first slice is drawn
            let values = grid
                .slice(0, shape)?
                .iter()
                .map(|&v| if v > 0.0 || v.is_nan() { v } else { 0.0 })
                .collect();
            (axis(shape.nx), axis(shape.ny), values)
        }
        DatasetHandle::NetCdf(ds) => {
            let data = ds.read_variable(&field.source_variable)?;
            let (nx, ny, values) = first_slice(data, &field.source_variable)?;
            let x = ds.read_variable(&field.x_variable)?;
            let y = ds.read_variable(&field.y_variable)?;
            (
                coordinates(&x.values, nx, ny, true, &field.x_variable)?,
                coordinates(&y.values, nx, ny, false, &field.y_variable)?,
                values,
            )
        }
    };

    Ok(PlotRequest {
        x,
        y,
        field: values,
        color_min: field.color_min,
        color_max: field.color_max,
        colormap: request.colormap.clone(),
    })
}

fn axis(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

/// Leading `ny` x `nx` slab of a variable shaped `[..., ny, nx]`.
fn first_slice(data: VariableData, name: &str) -> I2oResult<(usize, usize, Vec<f32>)> {
    let [.., ny, nx] = data.shape[..] else {
        return Err(I2oError::Unavailable {
            name: name.to_string(),
            reason: format!("expected at least 2 dimensions, got {:?}", data.shape),
        });
    };
    let mut values = data.values;
    values.truncate(nx * ny);
    Ok((nx, ny, values))
}

/// Coordinate axis from a 1-D variable, or from the first row (x) or first
/// column (y) of a 2-D one.
fn coordinates(values: &[f32], nx: usize, ny: usize, is_x: bool, name: &str) -> I2oResult<Vec<f64>> {
    let n = if is_x { nx } else { ny };
    if values.len() == n {
        return Ok(values.iter().map(|&v| v as f64).collect());
    }
    if values.len() == nx * ny {
        let picked = if is_x {
            values[..nx].iter().map(|&v| v as f64).collect()
        } else {
            values.iter().step_by(nx).map(|&v| v as f64).collect()
        };
        return Ok(picked);
    }
    Err(I2oError::Unavailable {
        name: name.to_string(),
        reason: format!("{} values do not match a {}x{} grid", values.len(), nx, ny),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_slice_takes_trailing_dims() {
        let data = VariableData {
            values: (0..24).map(|v| v as f32).collect(),
            shape: vec![2, 3, 4],
        };
        let (nx, ny, values) = first_slice(data, "swed").unwrap();
        assert_eq!((nx, ny), (4, 3));
        assert_eq!(values.len(), 12);

        let flat = VariableData {
            values: vec![1.0; 4],
            shape: vec![4],
        };
        assert!(first_slice(flat, "swed").is_err());
    }

    #[test]
    fn test_coordinates_from_2d_grid() {
        // 3 columns, 2 rows
        let lon = [10.0, 11.0, 12.0, 10.0, 11.0, 12.0];
        let lat = [50.0, 50.0, 50.0, 51.0, 51.0, 51.0];
        assert_eq!(coordinates(&lon, 3, 2, true, "lon").unwrap(), vec![10.0, 11.0, 12.0]);
        assert_eq!(coordinates(&lat, 3, 2, false, "lat").unwrap(), vec![50.0, 51.0]);
        assert!(coordinates(&[1.0; 5], 3, 2, true, "lon").is_err());
    }
}
