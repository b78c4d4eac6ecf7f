//! Label administration behind the CLI subcommands.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use i2o_common::{I2oError, I2oResult};
use storage::{
    Metadata, ProcessingStage, ProcessingStateTracker, RemoteObjectStore, CONTENT_SHA256_KEY,
};

/// Set one upload's stage.
///
/// Moves the stage diagram does not allow, such as leaving a terminal stage,
/// are refused unless `force` is set. Relabeling to the current stage only
/// updates the message.
pub async fn set_label(
    tracker: &ProcessingStateTracker,
    name: &str,
    stage: ProcessingStage,
    message: Option<&str>,
    force: bool,
) -> I2oResult<()> {
    if let Some(current) = tracker.stage_of(name).await? {
        if current != stage && !current.can_transition_to(stage) && !force {
            let why = if current.is_terminal() {
                format!("{} is terminal", current)
            } else {
                format!("{} cannot move to {} directly", current, stage)
            };
            return Err(I2oError::invalid(
                "stage",
                format!("'{}': {}; use --force to override", name, why),
            ));
        }
    }
    tracker.label(name, stage, message).await
}

/// Upload a local file and mark it ready for processing.
///
/// The object carries its SHA-256 so downloads can be verified.
pub async fn upload(
    store: &dyn RemoteObjectStore,
    tracker: &ProcessingStateTracker,
    path: &Path,
    name: Option<&str>,
) -> I2oResult<String> {
    let name = match name {
        Some(n) => n.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| I2oError::invalid("file", format!("{:?} has no file name", path)))?,
    };

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| I2oError::invalid("file", format!("cannot read {:?}: {}", path, e)))?;
    let digest = hex::encode(Sha256::digest(&data));
    let size = data.len();

    store
        .put(tracker.container(), &name, Bytes::from(data), "application/octet-stream")
        .await?;
    let mut metadata = Metadata::new();
    metadata.insert(CONTENT_SHA256_KEY.to_string(), digest);
    store.set_metadata(tracker.container(), &name, metadata).await?;
    tracker.mark_uploaded(&name).await?;

    info!(name = %name, size, "Uploaded");
    Ok(name)
}
