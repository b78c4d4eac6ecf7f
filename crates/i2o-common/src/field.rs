//! Field descriptors: per-parameter display and source metadata.
//!
//! Descriptors are loaded from a YAML table and are read-only at runtime.
//!
//! ```yaml
//! fields:
//!   - name: roff
//!     display_name: Runoff
//!     units: m
//!     colormap: blues
//!     color_min: 0.0
//!     color_max: 0.05
//!     source_variable: roff
//!     layout: static
//!     grid: { nx: 1810, ny: 900 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{I2oError, I2oResult};

/// How a parameter's model output is laid out in remote storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    /// One NetCDF file per day (`{param}_{year}_{month}_{day}.nc`).
    #[default]
    Dated,
    /// One raw float32 grid per parameter (`{param}.dat`).
    Static,
}

/// Dimensions of a raw grid slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub nx: usize,
    pub ny: usize,
}

impl GridShape {
    pub fn cells(&self) -> usize {
        self.nx * self.ny
    }
}

/// Metadata for a named physical parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub units: String,
    #[serde(default = "default_colormap")]
    pub colormap: String,
    pub color_min: f64,
    pub color_max: f64,
    /// Variable name inside the source file.
    pub source_variable: String,
    #[serde(default)]
    pub layout: DatasetLayout,
    #[serde(default)]
    pub grid: Option<GridShape>,
    #[serde(default = "default_x_variable")]
    pub x_variable: String,
    #[serde(default = "default_y_variable")]
    pub y_variable: String,
}

fn default_colormap() -> String {
    "binary".to_string()
}

fn default_x_variable() -> String {
    "lon".to_string()
}

fn default_y_variable() -> String {
    "lat".to_string()
}

/// Lookup of field descriptors by parameter name.
pub trait FieldTable: Send + Sync {
    fn get(&self, param: &str) -> I2oResult<FieldDescriptor>;
    fn all(&self) -> Vec<FieldDescriptor>;
}

#[derive(Debug, Deserialize)]
struct FieldTableFile {
    fields: Vec<FieldDescriptor>,
}

/// Field table held in memory, usually loaded from YAML.
#[derive(Debug, Clone, Default)]
pub struct StaticFieldTable {
    fields: BTreeMap<String, FieldDescriptor>,
}

impl StaticFieldTable {
    pub fn new(fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    pub fn from_yaml_str(content: &str) -> I2oResult<Self> {
        let file: FieldTableFile = serde_yaml::from_str(content)
            .map_err(|e| I2oError::internal(format!("Failed to parse field table: {}", e)))?;
        Ok(Self::new(file.fields))
    }

    pub fn load(path: impl AsRef<Path>) -> I2oResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            I2oError::internal(format!("Failed to read field table {:?}: {}", path, e))
        })?;
        let table = Self::from_yaml_str(&content)?;
        info!(path = ?path, fields = table.fields.len(), "Loaded field table");
        Ok(table)
    }
}

impl FieldTable for StaticFieldTable {
    fn get(&self, param: &str) -> I2oResult<FieldDescriptor> {
        self.fields
            .get(param)
            .cloned()
            .ok_or_else(|| I2oError::NotFound(format!("parameter '{}'", param)))
    }

    fn all(&self) -> Vec<FieldDescriptor> {
        self.fields.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
fields:
  - name: roff
    display_name: Runoff
    units: m
    colormap: blues
    color_min: 0.0
    color_max: 0.05
    source_variable: roff
    layout: static
    grid: { nx: 4, ny: 2 }
  - name: swe
    display_name: Snow water equivalent
    color_min: 0.0
    color_max: 2.5
    source_variable: swed
"#;

    #[test]
    fn test_parse_table_with_defaults() {
        let table = StaticFieldTable::from_yaml_str(TABLE).unwrap();
        let roff = table.get("roff").unwrap();
        assert_eq!(roff.layout, DatasetLayout::Static);
        assert_eq!(roff.grid, Some(GridShape { nx: 4, ny: 2 }));

        let swe = table.get("swe").unwrap();
        assert_eq!(swe.layout, DatasetLayout::Dated);
        assert_eq!(swe.colormap, "binary");
        assert_eq!(swe.x_variable, "lon");
        assert_eq!(table.all().len(), 2);
    }

    #[test]
    fn test_unknown_param_is_not_found() {
        let table = StaticFieldTable::from_yaml_str(TABLE).unwrap();
        assert!(table.get("salt").unwrap_err().is_not_found());
    }
}
