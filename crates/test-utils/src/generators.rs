//! Synthetic model output for tests.
//!
//! Generators are deterministic so tests can assert on exact values.

/// Creates a test grid with predictable values.
///
/// Each cell value is `col * 1000 + row`, row-major with row 0 first.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0);  // col=1, row=0
/// assert_eq!(grid[10], 1.0);    // col=0, row=1
/// ```
pub fn create_test_grid(nx: usize, ny: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(nx * ny);
    for row in 0..ny {
        for col in 0..nx {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates a runoff-like grid in metres.
///
/// Mostly zero, with deterministic positive cells and a few negative
/// fill values like the ones found over open ocean in model output.
pub fn create_runoff_grid(nx: usize, ny: usize, seed: u32) -> Vec<f32> {
    let mut data = Vec::with_capacity(nx * ny);
    for row in 0..ny {
        for col in 0..nx {
            let hash = simple_hash(col as u32, row as u32, seed);
            let value = match hash % 8 {
                0 | 1 => (hash % 500) as f32 / 10_000.0,
                2 => -9999.0,
                _ => 0.0,
            };
            data.push(value);
        }
    }
    data
}

/// Stack several slices into one raw grid, slice 0 first.
pub fn stack_slices(slices: &[Vec<f32>]) -> Vec<f32> {
    slices.iter().flatten().copied().collect()
}

/// Encode values the way raw `.dat` model output is stored (little-endian f32).
pub fn grid_to_le_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Creates a grid with NaN values at the given `(col, row)` positions, zeros elsewhere.
pub fn create_grid_with_nans(nx: usize, ny: usize, nan_positions: &[(usize, usize)]) -> Vec<f32> {
    let mut data = vec![0.0f32; nx * ny];
    for &(col, row) in nan_positions {
        if col < nx && row < ny {
            data[row * nx + col] = f32::NAN;
        }
    }
    data
}

/// A byte payload that starts with the classic NetCDF magic.
///
/// Enough for format detection; not a readable NetCDF file.
pub fn netcdf_classic_stub(len: usize) -> Vec<u8> {
    let mut data = b"CDF\x01".to_vec();
    data.resize(len.max(4), 0);
    data
}

/// Deterministic filler bytes of the given length.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn simple_hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h = h.wrapping_mul(31).wrapping_add(y);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runoff_grid_is_deterministic() {
        assert_eq!(create_runoff_grid(20, 10, 7), create_runoff_grid(20, 10, 7));
        assert_ne!(create_runoff_grid(20, 10, 7), create_runoff_grid(20, 10, 8));
    }

    #[test]
    fn test_le_bytes_layout() {
        let bytes = grid_to_le_bytes(&[1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_stack_slices() {
        let stacked = stack_slices(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(stacked, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
