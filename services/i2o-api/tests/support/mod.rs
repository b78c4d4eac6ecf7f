//! Shared harness: in-memory stores, fixture field table, counting collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use i2o_api::plot::{PlotRequest, Plotter, PngPlotter};
use i2o_api::query::{QueryRunner, SqlQuery, Table};
use i2o_api::{ApiConfig, AppState, Collaborators};
use i2o_common::{I2oResult, StaticFieldTable, FieldTable};
use storage::{FetchConfig, RemoteObjectStore, RetryPolicy};
use test_utils::{containers, create_runoff_grid, field_table, grid_to_le_bytes, ScriptedStore};

/// Plotter that counts calls and delegates to the PNG renderer.
#[derive(Default)]
pub struct CountingPlotter {
    pub calls: AtomicUsize,
}

impl Plotter for CountingPlotter {
    fn plot(&self, request: &PlotRequest) -> I2oResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PngPlotter.plot(request)
    }
}

/// Query runner answering every query with the same table.
pub struct CannedQueries {
    pub table: Table,
    pub seen: std::sync::Mutex<Vec<SqlQuery>>,
}

impl CannedQueries {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryRunner for CannedQueries {
    async fn fetch_table(&self, query: &SqlQuery) -> I2oResult<Table> {
        self.seen.lock().unwrap().push(query.clone());
        Ok(self.table.clone())
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub results: Arc<ScriptedStore>,
    pub models: Arc<ScriptedStore>,
    pub plotter: Arc<CountingPlotter>,
    pub queries: Option<Arc<CannedQueries>>,
    _work: TempDir,
}

pub struct HarnessBuilder {
    fail_open: bool,
    queries: Option<Table>,
    fields: StaticFieldTable,
}

impl HarnessBuilder {
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_fields(mut self, fields: StaticFieldTable) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_queries(mut self, table: Table) -> Self {
        self.queries = Some(table);
        self
    }

    pub async fn build(self) -> Harness {
        let work = tempfile::tempdir().unwrap();
        let results = Arc::new(ScriptedStore::new());
        let models = Arc::new(ScriptedStore::new());
        models
            .seed(
                containers::MODEL,
                "roff.dat",
                grid_to_le_bytes(&create_runoff_grid(6, 4, 7)),
            )
            .await;

        let plotter = Arc::new(CountingPlotter::default());
        let queries = self.queries.map(|t| Arc::new(CannedQueries::new(t)));

        let config = ApiConfig {
            work_dir: work.path().to_path_buf(),
            fetch: FetchConfig {
                retry: RetryPolicy::immediate(2),
                ..FetchConfig::default()
            },
            fail_open: self.fail_open,
            ..ApiConfig::default()
        };

        let state = AppState::assemble(
            config,
            Collaborators {
                result_store: results.clone() as Arc<dyn RemoteObjectStore>,
                model_store: models.clone() as Arc<dyn RemoteObjectStore>,
                fields: Arc::new(self.fields) as Arc<dyn FieldTable>,
                plotter: plotter.clone() as Arc<dyn Plotter>,
                queries: queries.clone().map(|q| q as Arc<dyn QueryRunner>),
            },
        )
        .unwrap();

        Harness {
            state: Arc::new(state),
            results,
            models,
            plotter,
            queries,
            _work: work,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            fail_open: false,
            queries: None,
            fields: field_table(),
        }
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub fn plot_calls(&self) -> usize {
        self.plotter.calls.load(Ordering::SeqCst)
    }
}

pub fn gauge_table() -> Table {
    Table {
        columns: vec!["date".into(), "gaugeid".into(), "discharge".into()],
        rows: vec![
            vec![Some("2014-03-10".into()), Some("15216000".into()), Some("41.2".into())],
            vec![Some("2014-03-11".into()), Some("15216000".into()), Some("39.8".into())],
        ],
    }
}
