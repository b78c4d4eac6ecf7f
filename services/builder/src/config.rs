//! Builder configuration, read from the environment.

use std::env;
use std::path::PathBuf;

use i2o_common::I2oResult;
use storage::{FetchConfig, RemoteStoreConfig};

pub const UPLOAD_STORE_PREFIX: &str = "I2O_UPLOAD_STORE";
pub const PRODUCT_STORE_PREFIX: &str = "I2O_PRODUCT_STORE";

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Raw uploads carrying processing-stage labels
    pub uploads: RemoteStoreConfig,
    /// Derived products written by the processor
    pub products: RemoteStoreConfig,
    pub work_dir: PathBuf,
    pub fetch: FetchConfig,
    /// Grid shapes and color ranges for previews; previews are skipped without it
    pub field_table: Option<PathBuf>,
}

impl BuilderConfig {
    pub fn from_env() -> I2oResult<Self> {
        Ok(Self {
            uploads: RemoteStoreConfig::from_env(UPLOAD_STORE_PREFIX, "uploads")?,
            products: RemoteStoreConfig::from_env(PRODUCT_STORE_PREFIX, "products")?,
            work_dir: env::var("I2O_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("ice2ocean-builder")),
            fetch: FetchConfig::from_env()?,
            field_table: env::var("I2O_FIELD_TABLE").ok().map(PathBuf::from),
        })
    }
}
