//! Common types shared across ice2ocean services.

pub mod dataset;
pub mod error;
pub mod field;
pub mod params;
pub mod time;

pub use dataset::{DatasetId, NameFormat};
pub use error::{ErrorKind, I2oError, I2oResult};
pub use field::{DatasetLayout, FieldDescriptor, FieldTable, GridShape, StaticFieldTable};
pub use params::{ParamValue, RequestParams};
pub use time::{extract_time, DatasetTime};
