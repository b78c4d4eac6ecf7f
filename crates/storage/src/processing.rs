//! Processing-stage labels on remote objects, used by the batch pipeline.
//!
//! ```text
//! Started ──► Processing ──► Completed
//!    │            │
//!    └────────────┴────────► Error
//! ```
//!
//! The stage lives in the object's metadata under `ProcessingStage`, with an
//! informational `Message` next to it. Labels merge into the existing
//! metadata; unrelated keys survive.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use i2o_common::{I2oError, I2oResult};

use crate::object_store::{Metadata, RemoteObjectStore};

pub const STAGE_KEY: &str = "ProcessingStage";
pub const MESSAGE_KEY: &str = "Message";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingStage {
    Started,
    Processing,
    Completed,
    Error,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 4] = [
        ProcessingStage::Started,
        ProcessingStage::Processing,
        ProcessingStage::Completed,
        ProcessingStage::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Started => "Started",
            ProcessingStage::Processing => "Processing",
            ProcessingStage::Completed => "Completed",
            ProcessingStage::Error => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Error)
    }

    /// Edges of the stage diagram.
    pub fn can_transition_to(&self, next: ProcessingStage) -> bool {
        use ProcessingStage::*;
        matches!(
            (self, next),
            (Started, Processing) | (Started, Error) | (Processing, Completed) | (Processing, Error)
        )
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStage {
    type Err = I2oError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                I2oError::invalid(
                    "stage",
                    format!("'{}' is not one of Started, Processing, Completed, Error", s),
                )
            })
    }
}

/// One labeled object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageEntry {
    pub name: String,
    pub stage: Option<ProcessingStage>,
    pub message: Option<String>,
}

impl StageEntry {
    fn from_metadata(name: String, metadata: &Metadata) -> Self {
        Self {
            name,
            stage: metadata.get(STAGE_KEY).and_then(|s| s.parse().ok()),
            message: metadata.get(MESSAGE_KEY).cloned(),
        }
    }
}

/// Reads and writes processing stages in one container.
pub struct ProcessingStateTracker {
    store: Arc<dyn RemoteObjectStore>,
    container: String,
}

impl ProcessingStateTracker {
    pub fn new(store: Arc<dyn RemoteObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Set the stage, merging into existing metadata.
    ///
    /// Without a message any previous `Message` is dropped, so a stale error
    /// text never sticks to a later stage.
    #[instrument(skip(self, message), fields(container = %self.container))]
    pub async fn label(
        &self,
        name: &str,
        stage: ProcessingStage,
        message: Option<&str>,
    ) -> I2oResult<()> {
        let mut metadata = self.store.get_metadata(&self.container, name).await?;
        let current = metadata
            .get(STAGE_KEY)
            .and_then(|s| s.parse::<ProcessingStage>().ok());
        if let Some(current) = current {
            if current != stage && !current.can_transition_to(stage) {
                warn!(
                    %current,
                    next = %stage,
                    terminal = current.is_terminal(),
                    "Label moves off the stage diagram"
                );
            }
        }
        apply_label(&mut metadata, stage, message);
        self.store
            .set_metadata(&self.container, name, metadata)
            .await?;
        debug!("Labeled object");
        Ok(())
    }

    /// Atomically move `name` from `from` to `to`.
    ///
    /// Returns `false` if the object was not in `from` or another writer
    /// changed it concurrently. At most one caller wins a given claim.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn claim(
        &self,
        name: &str,
        from: ProcessingStage,
        to: ProcessingStage,
    ) -> I2oResult<bool> {
        let (mut metadata, version) = self
            .store
            .get_metadata_versioned(&self.container, name)
            .await?;

        let current = metadata.get(STAGE_KEY).and_then(|s| s.parse().ok());
        if current != Some(from) {
            debug!(?current, "Object not in expected stage");
            return Ok(false);
        }

        apply_label(&mut metadata, to, None);
        let won = self
            .store
            .set_metadata_if(&self.container, name, metadata, &version)
            .await?;
        if !won {
            debug!("Lost claim race");
        }
        Ok(won)
    }

    pub async fn stage_of(&self, name: &str) -> I2oResult<Option<ProcessingStage>> {
        let metadata = self.store.get_metadata(&self.container, name).await?;
        Ok(metadata.get(STAGE_KEY).and_then(|s| s.parse().ok()))
    }

    /// Every object in `stage`, or every object when `stage` is `None`.
    pub async fn list_by_status(
        &self,
        stage: Option<ProcessingStage>,
    ) -> I2oResult<Vec<StageEntry>> {
        self.store
            .list_with_metadata(&self.container)
            .map_ok(|entry| StageEntry::from_metadata(entry.name, &entry.metadata))
            .try_filter(|entry| {
                let keep = stage.map_or(true, |s| entry.stage == Some(s));
                futures::future::ready(keep)
            })
            .try_collect()
            .await
    }

    /// Move every object in `old` to `new`. Returns the names moved.
    ///
    /// Each move is a claim, so objects relabeled concurrently by someone
    /// else are left alone.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn relabel_all(
        &self,
        old: ProcessingStage,
        new: ProcessingStage,
    ) -> I2oResult<Vec<String>> {
        let mut moved = Vec::new();
        for entry in self.list_by_status(Some(old)).await? {
            match self.claim(&entry.name, old, new).await {
                Ok(true) => moved.push(entry.name),
                Ok(false) => {}
                Err(e) if e.is_not_found() => {
                    warn!(name = %entry.name, "Object deleted during relabel");
                }
                Err(e) => return Err(e),
            }
        }
        info!(count = moved.len(), %old, %new, "Relabeled objects");
        Ok(moved)
    }

    /// Mark a freshly uploaded object as ready for processing.
    pub async fn mark_uploaded(&self, name: &str) -> I2oResult<()> {
        self.label(name, ProcessingStage::Started, None).await
    }
}

fn apply_label(metadata: &mut Metadata, stage: ProcessingStage, message: Option<&str>) {
    metadata.insert(STAGE_KEY.to_string(), stage.as_str().to_string());
    match message {
        Some(m) => {
            metadata.insert(MESSAGE_KEY.to_string(), m.to_string());
        }
        None => {
            metadata.remove(MESSAGE_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectStorage;
    use bytes::Bytes;

    async fn tracker_with(names: &[&str]) -> (Arc<ObjectStorage>, ProcessingStateTracker) {
        let store = Arc::new(ObjectStorage::in_memory());
        for name in names {
            store
                .put("uploads", name, Bytes::from_static(b"raw"), "application/octet-stream")
                .await
                .unwrap();
        }
        let tracker = ProcessingStateTracker::new(store.clone(), "uploads");
        (store, tracker)
    }

    fn names(entries: &[StageEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_stage_parsing_and_edges() {
        assert_eq!("processing".parse::<ProcessingStage>().unwrap(), ProcessingStage::Processing);
        assert!("Done".parse::<ProcessingStage>().is_err());

        assert!(ProcessingStage::Started.can_transition_to(ProcessingStage::Error));
        assert!(!ProcessingStage::Completed.can_transition_to(ProcessingStage::Started));
        assert!(ProcessingStage::Error.is_terminal());
    }

    #[tokio::test]
    async fn test_label_moves_between_listings() {
        let (_store, tracker) = tracker_with(&["a.dat"]).await;

        tracker.label("a.dat", ProcessingStage::Processing, None).await.unwrap();
        let processing = tracker.list_by_status(Some(ProcessingStage::Processing)).await.unwrap();
        assert_eq!(names(&processing), vec!["a.dat"]);

        tracker.label("a.dat", ProcessingStage::Completed, Some("ok")).await.unwrap();
        assert!(tracker
            .list_by_status(Some(ProcessingStage::Processing))
            .await
            .unwrap()
            .is_empty());
        let completed = tracker.list_by_status(Some(ProcessingStage::Completed)).await.unwrap();
        assert_eq!(names(&completed), vec!["a.dat"]);
        assert_eq!(completed[0].message.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_label_preserves_unrelated_metadata() {
        let (store, tracker) = tracker_with(&["a.dat"]).await;
        let mut md = Metadata::new();
        md.insert("UploadedBy".into(), "field-station-3".into());
        store.set_metadata("uploads", "a.dat", md).await.unwrap();

        tracker.label("a.dat", ProcessingStage::Error, Some("bad header")).await.unwrap();

        let md = store.get_metadata("uploads", "a.dat").await.unwrap();
        assert_eq!(md.get("UploadedBy").map(String::as_str), Some("field-station-3"));
        assert_eq!(md.get(STAGE_KEY).map(String::as_str), Some("Error"));
        assert_eq!(md.get(MESSAGE_KEY).map(String::as_str), Some("bad header"));
    }

    #[tokio::test]
    async fn test_claim_only_from_expected_stage() {
        let (_store, tracker) = tracker_with(&["a.dat"]).await;
        // Unlabeled objects cannot be claimed
        assert!(!tracker
            .claim("a.dat", ProcessingStage::Started, ProcessingStage::Processing)
            .await
            .unwrap());

        tracker.mark_uploaded("a.dat").await.unwrap();
        assert!(tracker
            .claim("a.dat", ProcessingStage::Started, ProcessingStage::Processing)
            .await
            .unwrap());
        assert!(!tracker
            .claim("a.dat", ProcessingStage::Started, ProcessingStage::Processing)
            .await
            .unwrap());
        assert_eq!(
            tracker.stage_of("a.dat").await.unwrap(),
            Some(ProcessingStage::Processing)
        );
    }

    #[tokio::test]
    async fn test_list_all_and_relabel_all() {
        let (_store, tracker) = tracker_with(&["a.dat", "b.dat", "c.dat"]).await;
        tracker.label("a.dat", ProcessingStage::Error, Some("x")).await.unwrap();
        tracker.label("b.dat", ProcessingStage::Error, None).await.unwrap();
        tracker.mark_uploaded("c.dat").await.unwrap();

        assert_eq!(tracker.list_by_status(None).await.unwrap().len(), 3);

        let mut moved = tracker
            .relabel_all(ProcessingStage::Error, ProcessingStage::Started)
            .await
            .unwrap();
        moved.sort();
        assert_eq!(moved, vec!["a.dat", "b.dat"]);
        assert_eq!(
            tracker
                .list_by_status(Some(ProcessingStage::Started))
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_label_missing_object_is_not_found() {
        let (_store, tracker) = tracker_with(&[]).await;
        assert!(tracker
            .label("ghost.dat", ProcessingStage::Started, None)
            .await
            .unwrap_err()
            .is_not_found());
    }
}
