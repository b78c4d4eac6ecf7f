//! Colormap lookup and grid rendering.

use renderer::gradient::{finite_range, render_grid, Color, Colormap, LUT_SIZE};

fn pixel(pixels: &[u8], width: usize, x: usize, y: usize) -> [u8; 4] {
    let p = (y * width + x) * 4;
    [pixels[p], pixels[p + 1], pixels[p + 2], pixels[p + 3]]
}

#[test]
fn test_named_colormaps_and_fallback() {
    for name in Colormap::NAMES {
        assert_eq!(Colormap::by_name(name).name(), name);
    }
    assert_eq!(Colormap::by_name("Viridis").name(), "viridis");
    assert_eq!(Colormap::by_name("no-such-map").name(), "binary");
}

#[test]
fn test_binary_runs_white_to_black() {
    let cmap = Colormap::by_name("binary");
    assert_eq!(cmap.color_at(0.0), Color::rgb(255, 255, 255));
    assert_eq!(cmap.color_at(1.0), Color::rgb(0, 0, 0));
    // Out of range clamps
    assert_eq!(cmap.color_at(-3.0), cmap.color_at(0.0));
    assert_eq!(cmap.color_at(7.5), cmap.color_at(1.0));
}

#[test]
fn test_colormap_has_bounded_color_count() {
    let cmap = Colormap::by_name("jet");
    let mut seen = std::collections::HashSet::new();
    for i in 0..10_000 {
        let c = cmap.color_at(i as f32 / 10_000.0);
        seen.insert((c.r, c.g, c.b, c.a));
    }
    assert!(seen.len() <= LUT_SIZE);
}

#[test]
fn test_first_data_row_is_bottom_of_image() {
    // 2 columns x 3 rows; row 0 low, row 2 high
    let data = [0.0, 0.0, 0.5, 0.5, 1.0, 1.0];
    let cmap = Colormap::by_name("gray");
    let pixels = render_grid(&data, 2, 3, 0.0, 1.0, &cmap);

    // Bottom image row comes from data row 0 (black in gray)
    assert_eq!(pixel(&pixels, 2, 0, 2), [0, 0, 0, 255]);
    // Top image row comes from data row 2 (white)
    assert_eq!(pixel(&pixels, 2, 1, 0), [255, 255, 255, 255]);
}

#[test]
fn test_non_finite_cells_are_transparent() {
    let data = [f32::NAN, 1.0, f32::INFINITY, 0.0];
    let pixels = render_grid(&data, 2, 2, 0.0, 1.0, &Colormap::by_name("binary"));
    // data row 0 -> image row 1
    assert_eq!(pixel(&pixels, 2, 0, 1)[3], 0);
    assert_eq!(pixel(&pixels, 2, 0, 0)[3], 0);
    assert_eq!(pixel(&pixels, 2, 1, 1)[3], 255);
}

#[test]
fn test_finite_range_skips_nan() {
    assert_eq!(finite_range(&[f32::NAN, 2.0, -1.0, f32::INFINITY]), Some((-1.0, 2.0)));
    assert_eq!(finite_range(&[f32::NAN]), None);
}
