//! Image rendering for model output grids.
//!
//! - Named colormaps and grid-to-RGBA rendering
//! - PNG encoding (indexed when the palette fits, RGBA otherwise)
//! - `plot_to_png`, the plotting entry point used by the services

pub mod error;
pub mod gradient;
pub mod plot;
pub mod png;

pub use error::{RenderError, RenderResult};
pub use gradient::{Color, Colormap};
pub use plot::plot_to_png;
