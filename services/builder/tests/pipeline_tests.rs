//! Batch pipeline against in-memory stores.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use builder::processor::StepError;
use builder::{admin, BatchDriver, PreviewProcessor, Processor, Worker};
use i2o_common::{FieldTable, I2oError};
use storage::{
    FetchConfig, LocalFileCache, ProcessingStage, ProcessingStateTracker, RemoteObjectStore,
    RetryPolicy, WorkDir, CONTENT_SHA256_KEY,
};
use test_utils::{
    containers, create_runoff_grid, field_table, grid_to_le_bytes, netcdf_classic_stub,
    ScriptedStore,
};

/// Counts calls and fails the items it is told to.
#[derive(Default)]
struct ScriptedProcessor {
    calls: AtomicUsize,
    fail_on: Vec<String>,
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Processor for ScriptedProcessor {
    async fn process(&self, name: &str) -> Result<Vec<String>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(name.to_string());
        tokio::task::yield_now().await;
        if self.fail_on.iter().any(|f| f == name) {
            return Err(StepError::new(
                "Building previews",
                I2oError::internal("plot crashed"),
            ));
        }
        Ok(vec![format!("{}.summary.json", name)])
    }
}

async fn uploads_with(names: &[&str]) -> (Arc<ScriptedStore>, Arc<ProcessingStateTracker>) {
    let store = Arc::new(ScriptedStore::new());
    let tracker = Arc::new(ProcessingStateTracker::new(
        store.clone() as Arc<dyn RemoteObjectStore>,
        containers::UPLOADS,
    ));
    for name in names {
        store.seed(containers::UPLOADS, name, b"raw".to_vec()).await;
        tracker.mark_uploaded(name).await.unwrap();
    }
    (store, tracker)
}

#[tokio::test]
async fn test_failed_item_is_labeled_and_batch_continues() {
    let (_store, tracker) = uploads_with(&["a.dat", "b.dat", "c.dat"]).await;
    let processor = Arc::new(ScriptedProcessor {
        fail_on: vec!["b.dat".to_string()],
        ..Default::default()
    });

    let driver = BatchDriver::new(tracker.clone(), processor.clone(), 1);
    let report = driver.run_once().await.unwrap();

    assert_eq!(report.workers, 1);
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

    let failed = tracker
        .list_by_status(Some(ProcessingStage::Error))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "b.dat");
    assert_eq!(
        failed[0].message.as_deref(),
        Some("P0 on b.dat: Building previews failed. More details: Internal server error: plot crashed")
    );
    assert_eq!(
        tracker
            .list_by_status(Some(ProcessingStage::Completed))
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_batch_processes_newest_names_first_round_robin() {
    let names = ["2014_3_1.nc", "2014_3_2.nc", "2014_3_3.nc", "2014_3_4.nc", "2014_3_5.nc"];
    let (_store, tracker) = uploads_with(&names).await;
    let processor = Arc::new(ScriptedProcessor::default());

    let report = BatchDriver::new(tracker.clone(), processor.clone(), 8)
        .run_once()
        .await
        .unwrap();

    // One worker per item when items are scarce
    assert_eq!(report.workers, 5);
    assert_eq!(report.completed.len(), 5);
    assert!(tracker
        .list_by_status(Some(ProcessingStage::Started))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_empty_batch_spawns_no_workers() {
    let (_store, tracker) = uploads_with(&[]).await;
    let report = BatchDriver::new(tracker, Arc::new(ScriptedProcessor::default()), 8)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.workers, 0);
    assert_eq!(report.total(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_workers_process_each_item_once() {
    let names = ["a.dat", "b.dat", "c.dat", "d.dat"];
    let (_store, tracker) = uploads_with(&names).await;
    let processor = Arc::new(ScriptedProcessor::default());

    // Both workers were handed the full list
    let items: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    let w1 = Worker::new("P0", tracker.clone(), processor.clone());
    let w2 = Worker::new("P1", tracker.clone(), processor.clone());
    let (r1, r2) = tokio::join!(w1.run(items.clone()), w2.run(items));

    assert_eq!(processor.calls.load(Ordering::SeqCst), 4);
    assert_eq!(r1.completed.len() + r2.completed.len(), 4);
    assert_eq!(r1.skipped.len() + r2.skipped.len(), 4);
    assert!(r1.failed.is_empty() && r2.failed.is_empty());
}

#[tokio::test]
async fn test_items_not_started_are_skipped() {
    let (_store, tracker) = uploads_with(&["a.dat"]).await;
    tracker
        .label("a.dat", ProcessingStage::Completed, None)
        .await
        .unwrap();
    let processor = Arc::new(ScriptedProcessor::default());

    let report = Worker::new("P0", tracker, processor.clone())
        .run(vec!["a.dat".to_string()])
        .await;
    assert_eq!(report.skipped, vec!["a.dat"]);
    assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_upload_is_labeled_error_not_fatal() {
    let (store, tracker) = uploads_with(&["a.dat", "b.dat"]).await;
    // Deleted between listing and claiming
    store.inner().delete(containers::UPLOADS, "a.dat").await.unwrap();

    let processor = Arc::new(ScriptedProcessor::default());
    let report = Worker::new("P0", tracker, processor)
        .run(vec!["a.dat".to_string(), "b.dat".to_string()])
        .await;

    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0]
        .message
        .starts_with("P0 on a.dat: Labeling as processing failed."));
    assert_eq!(report.completed, vec!["b.dat"]);
}

struct PreviewHarness {
    uploads: Arc<ScriptedStore>,
    products: Arc<ScriptedStore>,
    tracker: Arc<ProcessingStateTracker>,
    processor: Arc<PreviewProcessor>,
    _work: TempDir,
}

async fn preview_harness() -> PreviewHarness {
    let work = tempfile::tempdir().unwrap();
    let uploads = Arc::new(ScriptedStore::new());
    let products = Arc::new(ScriptedStore::new());
    let tracker = Arc::new(ProcessingStateTracker::new(
        uploads.clone() as Arc<dyn RemoteObjectStore>,
        containers::UPLOADS,
    ));
    let files = Arc::new(
        LocalFileCache::new(
            uploads.clone() as Arc<dyn RemoteObjectStore>,
            containers::UPLOADS,
            &WorkDir::new(work.path()).unwrap(),
            FetchConfig {
                retry: RetryPolicy::immediate(2),
                ..FetchConfig::default()
            },
        )
        .unwrap(),
    );
    let processor = Arc::new(PreviewProcessor::new(
        files,
        products.clone() as Arc<dyn RemoteObjectStore>,
        containers::PRODUCTS,
        Some(Arc::new(field_table()) as Arc<dyn FieldTable>),
    ));
    PreviewHarness {
        uploads,
        products,
        tracker,
        processor,
        _work: work,
    }
}

#[tokio::test]
async fn test_preview_processor_writes_products() {
    let h = preview_harness().await;
    let dir = tempfile::tempdir().unwrap();

    let grid_path = dir.path().join("roff.dat");
    std::fs::write(&grid_path, grid_to_le_bytes(&create_runoff_grid(6, 4, 3))).unwrap();
    let nc_path = dir.path().join("swe_2014_3_10.nc");
    std::fs::write(&nc_path, netcdf_classic_stub(256)).unwrap();
    let junk_path = dir.path().join("notes.nc");
    std::fs::write(&junk_path, b"not a dataset").unwrap();

    for path in [&grid_path, &nc_path, &junk_path] {
        admin::upload(h.uploads.as_ref(), &h.tracker, path, None)
            .await
            .unwrap();
    }
    let md = h
        .uploads
        .get_metadata(containers::UPLOADS, "roff.dat")
        .await
        .unwrap();
    assert_eq!(md.get(CONTENT_SHA256_KEY).map(String::len), Some(64));
    assert_eq!(md.get("ProcessingStage").map(String::as_str), Some("Started"));

    let report = BatchDriver::new(h.tracker.clone(), h.processor.clone(), 2)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].message.contains("on notes.nc: Opening failed."));

    let png = h.products.get(containers::PRODUCTS, "roff.png").await.unwrap();
    assert_eq!(&png[1..4], b"PNG");

    let summary: serde_json::Value = serde_json::from_slice(
        &h.products
            .get(containers::PRODUCTS, "roff.summary.json")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(summary["kind"], "grid");
    assert_eq!(summary["values"], 24);

    let summary: serde_json::Value = serde_json::from_slice(
        &h.products
            .get(containers::PRODUCTS, "swe_2014_3_10.summary.json")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(summary["format"], "Classic");
    // No preview for NetCDF uploads
    assert!(h
        .products
        .get(containers::PRODUCTS, "swe_2014_3_10.png")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_manual_label_follows_stage_diagram_unless_forced() {
    let (_store, tracker) = uploads_with(&["a.dat"]).await;

    admin::set_label(&tracker, "a.dat", ProcessingStage::Processing, None, false)
        .await
        .unwrap();
    admin::set_label(&tracker, "a.dat", ProcessingStage::Completed, None, false)
        .await
        .unwrap();

    // Completed is terminal
    let err = admin::set_label(&tracker, "a.dat", ProcessingStage::Started, None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, I2oError::InvalidParameter { .. }));
    assert!(err.to_string().contains("Completed is terminal"));
    assert_eq!(
        tracker.stage_of("a.dat").await.unwrap(),
        Some(ProcessingStage::Completed)
    );

    // Same stage only updates the message
    admin::set_label(&tracker, "a.dat", ProcessingStage::Completed, Some("checked"), false)
        .await
        .unwrap();

    admin::set_label(&tracker, "a.dat", ProcessingStage::Started, None, true)
        .await
        .unwrap();
    assert_eq!(
        tracker.stage_of("a.dat").await.unwrap(),
        Some(ProcessingStage::Started)
    );
}
