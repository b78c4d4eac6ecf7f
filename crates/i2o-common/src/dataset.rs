//! Dataset identity and deterministic local file naming.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::DatasetTime;

/// Default template for daily model output files.
pub const DEFAULT_NAME_FORMAT: &str = "{param}_{year}_{month}_{day}.nc";

/// Extension used for parameter-only raw grids.
pub const STATIC_EXTENSION: &str = "dat";

/// A logical model output dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetId {
    /// One file per parameter per day.
    Dated { param: String, time: DatasetTime },
    /// One file per parameter, e.g. `roff.dat`.
    Static { param: String },
}

impl DatasetId {
    pub fn dated(param: impl Into<String>, time: DatasetTime) -> Self {
        Self::Dated {
            param: param.into(),
            time,
        }
    }

    pub fn static_param(param: impl Into<String>) -> Self {
        Self::Static {
            param: param.into(),
        }
    }

    pub fn param(&self) -> &str {
        match self {
            DatasetId::Dated { param, .. } | DatasetId::Static { param } => param,
        }
    }

    /// Remote blob name and local file name for this dataset.
    pub fn file_name(&self, format: &NameFormat) -> String {
        match self {
            DatasetId::Dated { param, time } => format.render(param, time),
            DatasetId::Static { param } => format!("{}.{}", param, STATIC_EXTENSION),
        }
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetId::Dated { param, time } => write!(f, "{}@{}", param, time),
            DatasetId::Static { param } => write!(f, "{}", param),
        }
    }
}

/// File name template parameterized by parameter name and date.
///
/// Placeholders: `{param}`, `{year}`, `{month}`, `{day}`. The positional
/// forms `{0}`..`{3}` are accepted in the same order. Month and day are
/// rendered without zero padding, matching the names the uploader produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameFormat(String);

impl NameFormat {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn template(&self) -> &str {
        &self.0
    }

    pub fn render(&self, param: &str, time: &DatasetTime) -> String {
        let year = time.year.to_string();
        let month = time.month.to_string();
        let day = time.day.to_string();
        self.0
            .replace("{param}", param)
            .replace("{year}", &year)
            .replace("{month}", &month)
            .replace("{day}", &day)
            .replace("{0}", param)
            .replace("{1}", &year)
            .replace("{2}", &month)
            .replace("{3}", &day)
    }
}

impl Default for NameFormat {
    fn default() -> Self {
        Self(DEFAULT_NAME_FORMAT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dated_file_name() {
        let t = DatasetTime::new(2014, 3, 10).unwrap();
        let id = DatasetId::dated("roff", t);
        assert_eq!(id.file_name(&NameFormat::default()), "roff_2014_3_10.nc");
    }

    #[test]
    fn test_static_file_name() {
        let id = DatasetId::static_param("prec");
        assert_eq!(id.file_name(&NameFormat::default()), "prec.dat");
    }

    #[test]
    fn test_positional_template() {
        let t = DatasetTime::new(2014, 12, 1).unwrap();
        let fmt = NameFormat::new("{0}_{1}_{2}_{3}.nc");
        assert_eq!(fmt.render("swe", &t), "swe_2014_12_1.nc");
    }
}
