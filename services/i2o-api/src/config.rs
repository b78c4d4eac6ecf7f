//! Service configuration, read from the environment.

use std::env;
use std::path::PathBuf;

use i2o_common::{I2oResult, NameFormat};
use storage::{FetchConfig, ObjectStorageConfig, RemoteStoreConfig};

pub const RESULT_STORE_PREFIX: &str = "I2O_RESULT_STORE";
pub const MODEL_STORE_PREFIX: &str = "I2O_MODEL_STORE";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Where computed artifacts are cached
    pub result_store: RemoteStoreConfig,
    /// Where model output files are published
    pub model_store: RemoteStoreConfig,
    /// Root of the local working set
    pub work_dir: PathBuf,
    pub fetch: FetchConfig,
    pub name_format: NameFormat,
    pub field_table: PathBuf,
    /// Time series and vector endpoints answer 503 without a database
    pub database_url: Option<String>,
    /// Recompute instead of failing when the result cache is unreachable
    pub fail_open: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            result_store: RemoteStoreConfig {
                storage: ObjectStorageConfig::default(),
                container: "ice2oceans".to_string(),
            },
            model_store: RemoteStoreConfig {
                storage: ObjectStorageConfig::default(),
                container: "snowmodel".to_string(),
            },
            work_dir: env::temp_dir().join("ice2ocean"),
            fetch: FetchConfig::default(),
            name_format: NameFormat::default(),
            field_table: PathBuf::from("config/fields.yaml"),
            database_url: None,
            fail_open: false,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> I2oResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            result_store: RemoteStoreConfig::from_env(
                RESULT_STORE_PREFIX,
                &defaults.result_store.container,
            )?,
            model_store: RemoteStoreConfig::from_env(
                MODEL_STORE_PREFIX,
                &defaults.model_store.container,
            )?,
            work_dir: env::var("I2O_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            fetch: FetchConfig::from_env()?,
            name_format: env::var("NAME_FORMAT")
                .map(NameFormat::new)
                .unwrap_or(defaults.name_format),
            field_table: env::var("I2O_FIELD_TABLE")
                .map(PathBuf::from)
                .unwrap_or(defaults.field_table),
            database_url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            fail_open: env::var("I2O_RESULT_CACHE_FAIL_OPEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}
