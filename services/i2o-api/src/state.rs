//! Application state and shared resources.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, warn};

use i2o_common::{FieldTable, I2oResult, StaticFieldTable};
use storage::{
    DatasetAcquirer, LocalFileCache, RemoteObjectStore, ResultCache, ResultCacheConfig, WorkDir,
};

use crate::config::ApiConfig;
use crate::metrics::MetricsCollector;
use crate::plot::{PngPlotter, Plotter};
use crate::query::{PgQueryRunner, QueryRunner};

/// External collaborators, constructed by the caller.
pub struct Collaborators {
    pub result_store: Arc<dyn RemoteObjectStore>,
    pub model_store: Arc<dyn RemoteObjectStore>,
    pub fields: Arc<dyn FieldTable>,
    pub plotter: Arc<dyn Plotter>,
    pub queries: Option<Arc<dyn QueryRunner>>,
}

/// Shared application state.
pub struct AppState {
    pub config: ApiConfig,
    pub results: ResultCache,
    pub files: Arc<LocalFileCache>,
    pub datasets: DatasetAcquirer,
    pub fields: Arc<dyn FieldTable>,
    pub plotter: Arc<dyn Plotter>,
    pub queries: Option<Arc<dyn QueryRunner>>,
    pub metrics: Arc<MetricsCollector>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Connect to everything named in `config`.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let result_store: Arc<dyn RemoteObjectStore> = Arc::new(config.result_store.connect()?);
        let model_store: Arc<dyn RemoteObjectStore> = Arc::new(config.model_store.connect()?);
        let fields: Arc<dyn FieldTable> = Arc::new(StaticFieldTable::load(&config.field_table)?);

        let queries: Option<Arc<dyn QueryRunner>> = match &config.database_url {
            Some(url) => Some(Arc::new(PgQueryRunner::connect(url).await?)),
            None => {
                warn!("DATABASE_URL not set; time series and vector endpoints disabled");
                None
            }
        };

        let state = Self::assemble(
            config,
            Collaborators {
                result_store,
                model_store,
                fields,
                plotter: Arc::new(PngPlotter),
                queries,
            },
        )?;
        info!(
            results = state.results.container(),
            models = state.files.container(),
            work_dir = ?state.files.dir(),
            "Application state ready"
        );
        Ok(state)
    }

    /// Wire caches and acquirer around already-constructed collaborators.
    pub fn assemble(config: ApiConfig, parts: Collaborators) -> I2oResult<Self> {
        let results = ResultCache::new(
            parts.result_store,
            ResultCacheConfig {
                container: config.result_store.container.clone(),
                fail_open: config.fail_open,
            },
        );

        let work_dir = WorkDir::new(&config.work_dir)?;
        let files = Arc::new(LocalFileCache::new(
            parts.model_store,
            config.model_store.container.clone(),
            &work_dir,
            config.fetch.clone(),
        )?);
        let datasets = DatasetAcquirer::new(files.clone(), config.name_format.clone());

        Ok(Self {
            config,
            results,
            files,
            datasets,
            fields: parts.fields,
            plotter: parts.plotter,
            queries: parts.queries,
            metrics: Arc::new(MetricsCollector::new()),
            prometheus: None,
        })
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
