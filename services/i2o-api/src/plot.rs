//! Plotting collaborator.

use i2o_common::{I2oError, I2oResult};

/// Everything needed to draw one field.
#[derive(Debug, Clone)]
pub struct PlotRequest {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Row-major, `y.len()` rows of `x.len()` values
    pub field: Vec<f32>,
    pub color_min: f64,
    pub color_max: f64,
    pub colormap: String,
}

/// Turns a grid and color range into image bytes.
pub trait Plotter: Send + Sync {
    fn plot(&self, request: &PlotRequest) -> I2oResult<Vec<u8>>;

    fn content_type(&self) -> &'static str {
        "image/png"
    }
}

/// Default plotter: the in-process PNG renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngPlotter;

impl Plotter for PngPlotter {
    fn plot(&self, request: &PlotRequest) -> I2oResult<Vec<u8>> {
        renderer::plot_to_png(
            &request.x,
            &request.y,
            &request.field,
            request.color_min,
            request.color_max,
            &request.colormap,
        )
        .map_err(|e| I2oError::internal(format!("plotting failed: {}", e)))
    }
}
