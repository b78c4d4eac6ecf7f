//! Plotting entry point: coordinates, a field and a color range in, PNG out.

use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::gradient::{finite_range, render_grid, Colormap};
use crate::png::create_png_auto;

/// Plot `field` as a transparent-background PNG.
///
/// The image is `x.len()` pixels wide and `y.len()` pixels tall; `field`
/// holds `y.len()` rows of `x.len()` values with the first row at the bottom.
/// When the color range is empty or not finite the data's own range is used.
pub fn plot_to_png(
    x: &[f64],
    y: &[f64],
    field: &[f32],
    color_min: f64,
    color_max: f64,
    colormap_name: &str,
) -> RenderResult<Vec<u8>> {
    let (width, height) = (x.len(), y.len());
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidDimensions(format!(
            "{}x{} image",
            width, height
        )));
    }
    if field.len() != width * height {
        return Err(RenderError::InvalidDimensions(format!(
            "field has {} values, expected {} ({}x{})",
            field.len(),
            width * height,
            width,
            height
        )));
    }

    let (lo, hi) = if color_min.is_finite() && color_max.is_finite() && color_min != color_max {
        (color_min as f32, color_max as f32)
    } else {
        finite_range(field).unwrap_or((0.0, 1.0))
    };

    let colormap = Colormap::by_name(colormap_name);
    debug!(width, height, lo, hi, colormap = colormap.name(), "Plotting field");

    let pixels = render_grid(field, width, height, lo, hi, &colormap);
    create_png_auto(&pixels, width, height)
}
