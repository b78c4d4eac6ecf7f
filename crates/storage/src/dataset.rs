//! Opening model output datasets from the local working set.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use i2o_common::{DatasetId, DatasetTime, GridShape, I2oError, I2oResult, NameFormat};

use crate::local_cache::{LocalFile, LocalFileCache};

/// Whether NetCDF variables can be read in this build.
pub const NETCDF_SUPPORT: bool = cfg!(feature = "netcdf");

/// On-disk flavor of a NetCDF file, detected from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetCdfFormat {
    Classic,
    Offset64,
    Cdf5,
    /// NetCDF-4, stored as HDF5
    Hdf5,
}

impl NetCdfFormat {
    pub fn detect(header: &[u8]) -> Option<Self> {
        const HDF5_SIGNATURE: &[u8] = b"\x89HDF\r\n\x1a\n";
        match header {
            [b'C', b'D', b'F', 1, ..] => Some(Self::Classic),
            [b'C', b'D', b'F', 2, ..] => Some(Self::Offset64),
            [b'C', b'D', b'F', 5, ..] => Some(Self::Cdf5),
            h if h.starts_with(HDF5_SIGNATURE) => Some(Self::Hdf5),
            _ => None,
        }
    }
}

/// Values of one variable with its dimension lengths, slowest first.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableData {
    pub values: Vec<f32>,
    pub shape: Vec<usize>,
}

/// A verified NetCDF file ready for reading.
#[derive(Debug, Clone)]
pub struct NetCdfDataset {
    path: PathBuf,
    format: NetCdfFormat,
}

impl NetCdfDataset {
    pub fn open(path: &Path) -> I2oResult<Self> {
        let mut header = [0u8; 8];
        let read = read_prefix(path, &mut header)?;
        let format = NetCdfFormat::detect(&header[..read]).ok_or_else(|| {
            I2oError::Unavailable {
                name: display_name(path),
                reason: "not a NetCDF file".to_string(),
            }
        })?;
        debug!(path = ?path, ?format, "Opened NetCDF dataset");
        Ok(Self {
            path: path.to_path_buf(),
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> NetCdfFormat {
        self.format
    }

    /// Read a whole variable as `f32`.
    #[cfg(feature = "netcdf")]
    pub fn read_variable(&self, name: &str) -> I2oResult<VariableData> {
        let unavailable = |reason: String| I2oError::Unavailable {
            name: display_name(&self.path),
            reason,
        };

        let file = netcdf::open(&self.path).map_err(|e| unavailable(e.to_string()))?;
        let var = file
            .variable(name)
            .ok_or_else(|| I2oError::NotFound(format!("variable '{}'", name)))?;
        let shape = var.dimensions().iter().map(|d| d.len()).collect();
        let values = var
            .get_values::<f32, _>(..)
            .map_err(|e| unavailable(format!("reading '{}': {}", name, e)))?;
        Ok(VariableData { values, shape })
    }

    #[cfg(not(feature = "netcdf"))]
    pub fn read_variable(&self, name: &str) -> I2oResult<VariableData> {
        Err(I2oError::Unavailable {
            name: display_name(&self.path),
            reason: format!(
                "cannot read '{}': built without the `netcdf` feature",
                name
            ),
        })
    }
}

/// A raw little-endian `f32` grid, possibly holding several stacked slices.
#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    values: Vec<f32>,
}

impl GridData {
    pub fn open(path: &Path) -> I2oResult<Self> {
        let raw = std::fs::read(path).map_err(|e| io_error(path, e))?;
        Self::from_le_bytes(&raw).map_err(|reason| I2oError::Unavailable {
            name: display_name(path),
            reason,
        })
    }

    pub fn from_le_bytes(raw: &[u8]) -> Result<Self, String> {
        if raw.len() % 4 != 0 {
            return Err(format!("{} bytes is not a whole number of f32 values", raw.len()));
        }
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { values })
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of whole `shape` slices in the grid.
    pub fn slices(&self, shape: GridShape) -> usize {
        match shape.cells() {
            0 => 0,
            cells => self.values.len() / cells,
        }
    }

    /// The `index`-th `ny` x `nx` slice, rows in file order.
    pub fn slice(&self, index: usize, shape: GridShape) -> I2oResult<&[f32]> {
        let cells = shape.cells();
        let start = index * cells;
        self.values
            .get(start..start + cells)
            .filter(|_| cells > 0)
            .ok_or_else(|| {
                I2oError::internal(format!(
                    "slice {} of {}x{} is outside a grid of {} values",
                    index,
                    shape.nx,
                    shape.ny,
                    self.values.len()
                ))
            })
    }
}

/// An open, read-only dataset.
#[derive(Debug, Clone)]
pub enum DatasetHandle {
    NetCdf(NetCdfDataset),
    Grid(GridData),
}

impl DatasetHandle {
    pub fn as_grid(&self) -> Option<&GridData> {
        match self {
            DatasetHandle::Grid(g) => Some(g),
            DatasetHandle::NetCdf(_) => None,
        }
    }

    pub fn as_netcdf(&self) -> Option<&NetCdfDataset> {
        match self {
            DatasetHandle::NetCdf(n) => Some(n),
            DatasetHandle::Grid(_) => None,
        }
    }
}

/// Turns dataset identities into open handles, fetching as needed.
pub struct DatasetAcquirer {
    files: Arc<LocalFileCache>,
    name_format: NameFormat,
}

impl DatasetAcquirer {
    pub fn new(files: Arc<LocalFileCache>, name_format: NameFormat) -> Self {
        Self { files, name_format }
    }

    pub fn files(&self) -> &LocalFileCache {
        &self.files
    }

    /// Fetch and open. Open failures become `Unavailable`, never `None`.
    #[instrument(skip(self), fields(dataset = %id))]
    pub async fn acquire(&self, id: &DatasetId) -> I2oResult<DatasetHandle> {
        let file_name = id.file_name(&self.name_format);
        let handle = match id {
            DatasetId::Static { .. } => {
                self.files
                    .fetch_and_open(&file_name, |f| open_grid(f).map(DatasetHandle::Grid))
                    .await
            }
            DatasetId::Dated { .. } => {
                self.files
                    .fetch_and_open(&file_name, |f| open_netcdf(f).map(DatasetHandle::NetCdf))
                    .await
            }
        };

        if let Err(e) = &handle {
            warn!(error = %e, "Dataset acquisition failed");
        }
        handle
    }

    /// Parameter-only dataset, e.g. `roff.dat`.
    pub async fn acquire_param(&self, param: &str) -> I2oResult<DatasetHandle> {
        self.acquire(&DatasetId::static_param(param)).await
    }

    pub async fn acquire_dated(&self, param: &str, time: DatasetTime) -> I2oResult<DatasetHandle> {
        self.acquire(&DatasetId::dated(param, time)).await
    }
}

fn open_grid(file: &LocalFile) -> I2oResult<GridData> {
    GridData::open(&file.path)
}

fn open_netcdf(file: &LocalFile) -> I2oResult<NetCdfDataset> {
    NetCdfDataset::open(&file.path)
}

fn read_prefix(path: &Path, buf: &mut [u8]) -> I2oResult<usize> {
    use std::io::Read;
    let mut file = std::fs::File::open(path).map_err(|e| io_error(path, e))?;
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(io_error(path, e)),
        }
    }
    Ok(filled)
}

/// A vanished file is NotFound so callers can fetch again.
fn io_error(path: &Path, e: std::io::Error) -> I2oError {
    if e.kind() == std::io::ErrorKind::NotFound {
        I2oError::NotFound(display_name(path))
    } else {
        I2oError::Unavailable {
            name: display_name(path),
            reason: e.to_string(),
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
