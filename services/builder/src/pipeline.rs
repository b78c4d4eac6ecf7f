//! Batch driver: statically partition `Started` items across workers and
//! wait for every worker to finish.
//!
//! Each item is claimed with a compare-and-swap from `Started` to
//! `Processing`, so an item listed by two overlapping batches is processed
//! at most once. A failed item is labeled `Error` and the worker moves on.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use i2o_common::I2oResult;
use storage::{ProcessingStage, ProcessingStateTracker};

use crate::processor::{Processor, StepContext, StepError};

/// Split `items` round-robin over at most `workers` workloads.
///
/// Item `i` goes to workload `i % p` where `p = min(workers, items.len())`.
/// No items (or no workers) yields no workloads.
pub fn partition_round_robin<T: Clone>(items: &[T], workers: usize) -> Vec<Vec<T>> {
    let p = workers.min(items.len());
    if p == 0 {
        return Vec::new();
    }
    let mut workloads = vec![Vec::with_capacity(items.len() / p + 1); p];
    for (i, item) in items.iter().enumerate() {
        workloads[i % p].push(item.clone());
    }
    workloads
}

/// Item that failed, with the message written to its `Message` label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub name: String,
    pub message: String,
}

/// Outcome of one worker's workload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub worker: String,
    pub completed: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// Claimed by someone else first
    pub skipped: Vec<String>,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub workers: usize,
    pub completed: Vec<String>,
    pub failed: Vec<FailedItem>,
    pub skipped: Vec<String>,
}

impl BatchReport {
    fn absorb(&mut self, report: WorkerReport) {
        self.completed.extend(report.completed);
        self.failed.extend(report.failed);
        self.skipped.extend(report.skipped);
    }

    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} items, {} workers: {} completed, {} failed, {} skipped",
            self.total(),
            self.workers,
            self.completed.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        for item in &self.failed {
            writeln!(f, "  {}", item.message)?;
        }
        Ok(())
    }
}

/// Processes one workload, item by item.
pub struct Worker {
    name: String,
    tracker: Arc<ProcessingStateTracker>,
    processor: Arc<dyn Processor>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        tracker: Arc<ProcessingStateTracker>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            name: name.into(),
            tracker,
            processor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, items), fields(worker = %self.name, items = items.len()))]
    pub async fn run(&self, items: Vec<String>) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.name.clone(),
            ..WorkerReport::default()
        };

        for item in items {
            info!(item = %item, "Started item");
            match self.process_item(&item).await {
                Ok(true) => report.completed.push(item),
                Ok(false) => {
                    info!(item = %item, "Claimed elsewhere, skipping");
                    report.skipped.push(item);
                }
                Err(e) => {
                    let message = format!("{} on {}: {}", self.name, item, e);
                    error!(item = %item, "{}", message);
                    if let Err(label_err) = self
                        .tracker
                        .label(&item, ProcessingStage::Error, Some(&message))
                        .await
                    {
                        error!(item = %item, error = %label_err, "Could not label item as failed");
                    }
                    report.failed.push(FailedItem {
                        name: item,
                        message,
                    });
                }
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Worker finished"
        );
        report
    }

    /// `Ok(false)` when another worker holds the claim.
    async fn process_item(&self, item: &str) -> Result<bool, StepError> {
        let claimed = self
            .tracker
            .claim(item, ProcessingStage::Started, ProcessingStage::Processing)
            .await
            .step("Labeling as processing")?;
        if !claimed {
            return Ok(false);
        }

        self.processor.process(item).await?;

        self.tracker
            .label(item, ProcessingStage::Completed, None)
            .await
            .step("Labeling as completed")?;
        Ok(true)
    }
}

/// Lists `Started` items and fans them out over workers.
pub struct BatchDriver {
    tracker: Arc<ProcessingStateTracker>,
    processor: Arc<dyn Processor>,
    workers: usize,
}

impl BatchDriver {
    pub fn new(
        tracker: Arc<ProcessingStateTracker>,
        processor: Arc<dyn Processor>,
        workers: usize,
    ) -> Self {
        Self {
            tracker,
            processor,
            workers,
        }
    }

    /// Run one batch over everything currently `Started` and wait for it.
    #[instrument(skip(self), fields(max_workers = self.workers))]
    pub async fn run_once(&self) -> I2oResult<BatchReport> {
        let mut items: Vec<String> = self
            .tracker
            .list_by_status(Some(ProcessingStage::Started))
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect();
        // Newest names first, so recent output is ready sooner
        items.sort_unstable_by(|a, b| b.cmp(a));

        let workloads = partition_round_robin(&items, self.workers);
        info!(items = items.len(), workers = workloads.len(), "Starting batch");

        let handles: Vec<_> = workloads
            .into_iter()
            .enumerate()
            .map(|(i, workload)| {
                let worker = Worker::new(
                    format!("P{}", i),
                    self.tracker.clone(),
                    self.processor.clone(),
                );
                tokio::spawn(async move { worker.run(workload).await })
            })
            .collect();

        let mut report = BatchReport {
            workers: handles.len(),
            ..BatchReport::default()
        };
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(worker_report) => report.absorb(worker_report),
                Err(e) => warn!(error = %e, "Worker task aborted"),
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Batch finished"
        );
        Ok(report)
    }
}
