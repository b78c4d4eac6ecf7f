//! Local working set of remote model output files.
//!
//! Each remote container gets its own directory under the [`WorkDir`]. A file
//! counts as present only when its completion marker (`{file}.complete`)
//! exists and records the file's current size. Downloads land in a unique
//! `.part` file and are renamed into place once verified, so a reader never
//! sees a half-written file under the final name.
//!
//! Concurrent fetches of one name are collapsed into one flight. The first
//! caller downloads, the others wait for it and get its outcome, failures
//! included. Leftover `.part` files older than the fetch deadline are swept
//! when the cache is opened and on eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use futures::TryStreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use i2o_common::{I2oError, I2oResult};

use crate::object_store::RemoteObjectStore;
use crate::retry::RetryPolicy;

/// Remote metadata key carrying the hex SHA-256 of an object's payload.
pub const CONTENT_SHA256_KEY: &str = "ContentSha256";

const MARKER_SUFFIX: &str = "complete";
const PART_SUFFIX: &str = "part";

/// Root of the local working set.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> I2oResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            I2oError::internal(format!("Failed to create work dir {:?}: {}", root, e))
        })?;
        Ok(Self { root })
    }

    /// `$TMPDIR/ice2ocean`
    pub fn in_temp() -> I2oResult<Self> {
        Self::new(std::env::temp_dir().join("ice2ocean"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding files fetched from `container`.
    pub fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }
}

/// Fetch behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub retry: RetryPolicy,
    /// Upper bound on one whole fetch, retries included
    #[serde(with = "secs")]
    pub deadline: Duration,
    /// Re-hash local files before trusting them
    pub verify_checksum_on_reuse: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            deadline: Duration::from_secs(1000),
            verify_checksum_on_reuse: false,
        }
    }
}

impl FetchConfig {
    /// Overrides from `I2O_FETCH_MAX_ATTEMPTS`, `I2O_FETCH_INITIAL_BACKOFF_MS`,
    /// `I2O_FETCH_MAX_BACKOFF_MS`, `I2O_FETCH_DEADLINE_SECS` and
    /// `I2O_FETCH_VERIFY_CHECKSUM`.
    pub fn from_env() -> I2oResult<Self> {
        fn number<T: std::str::FromStr>(name: &str) -> I2oResult<Option<T>> {
            match std::env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| I2oError::internal(format!("{} must be a number, got '{}'", name, raw))),
                Err(_) => Ok(None),
            }
        }

        let mut config = Self::default();
        if let Some(n) = number("I2O_FETCH_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = number("I2O_FETCH_INITIAL_BACKOFF_MS")? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = number("I2O_FETCH_MAX_BACKOFF_MS")? {
            config.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = number("I2O_FETCH_DEADLINE_SECS")? {
            config.deadline = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("I2O_FETCH_VERIFY_CHECKSUM") {
            config.verify_checksum_on_reuse = v == "true" || v == "1";
        }
        Ok(config)
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Written next to a file once its download has been verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub size_bytes: u64,
    pub sha256: String,
    pub fetched_at: DateTime<Utc>,
    pub e_tag: Option<String>,
}

/// A verified local copy of a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Entry of [`LocalFileCache::list_local`].
#[derive(Debug, Clone, Serialize)]
pub struct LocalFileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub verified: bool,
}

/// Per-file result of [`LocalFileCache::evict_smaller_than`].
#[derive(Debug, Clone, Serialize)]
pub struct EvictionOutcome {
    pub name: String,
    pub size_bytes: u64,
    pub removed: bool,
    pub error: Option<String>,
}

/// Outcome of one fetch, shared by every caller that joined it.
type Flight = OnceCell<I2oResult<LocalFile>>;

/// Maps remote object names in one container to verified local files.
pub struct LocalFileCache {
    store: Arc<dyn RemoteObjectStore>,
    container: String,
    dir: PathBuf,
    config: FetchConfig,
    flights: Mutex<HashMap<String, Arc<Flight>>>,
    /// Serializes downloads and evictions of one name
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalFileCache {
    pub fn new(
        store: Arc<dyn RemoteObjectStore>,
        container: impl Into<String>,
        work_dir: &WorkDir,
        config: FetchConfig,
    ) -> I2oResult<Self> {
        let container = container.into();
        let dir = work_dir.container_dir(&container);
        std::fs::create_dir_all(&dir).map_err(|e| {
            I2oError::internal(format!("Failed to create cache dir {:?}: {}", dir, e))
        })?;

        let swept = sweep_stale_parts(&dir, config.deadline);
        if swept > 0 {
            info!(container = %container, swept, "Removed stale partial downloads");
        }

        Ok(Self {
            store,
            container,
            dir,
            config,
            flights: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic local path for `name`.
    pub fn path_for(&self, name: &str) -> I2oResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Return a verified local copy of `name`, downloading it if needed.
    ///
    /// Callers arriving while a fetch of `name` is in flight wait for it and
    /// share its result. The deadline covers the wait for a concurrent
    /// eviction as well as the download itself.
    #[instrument(skip(self), fields(container = %self.container))]
    pub async fn fetch(&self, name: &str) -> I2oResult<LocalFile> {
        let path = self.path_for(name)?;
        let flight = self.join_flight(name);
        flight
            .get_or_init(|| self.lead_flight(name, &path, &flight))
            .await
            .clone()
    }

    /// Fetch `name` and open it with `open` on the blocking pool.
    ///
    /// The file may be evicted between the presence check and the open. When
    /// `open` reports NotFound the file is fetched again, once.
    pub async fn fetch_and_open<T, F>(&self, name: &str, open: F) -> I2oResult<T>
    where
        F: Fn(&LocalFile) -> I2oResult<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let file = self.fetch(name).await?;
        match open_blocking(open.clone(), file).await {
            Err(e) if e.is_not_found() => {
                warn!(name, "Local file vanished before open, fetching again");
                let file = self.fetch(name).await?;
                open_blocking(open, file).await
            }
            other => other,
        }
    }

    fn join_flight(&self, name: &str) -> Arc<Flight> {
        let mut flights = self.flights.lock().unwrap_or_else(|p| p.into_inner());
        flights.entry(name.to_string()).or_default().clone()
    }

    /// Run the fetch for everyone on `flight`, then retire the flight so the
    /// next caller starts fresh.
    async fn lead_flight(&self, name: &str, path: &Path, flight: &Arc<Flight>) -> I2oResult<LocalFile> {
        let lock = self.lock_for(name);
        let fetched = tokio::time::timeout(self.config.deadline, async {
            let _guard = lock.lock().await;
            self.fetch_locked(name, path).await
        })
        .await;
        self.release(name, lock);

        let result = fetched.unwrap_or_else(|_| {
            warn!(deadline = ?self.config.deadline, "Fetch deadline exceeded");
            Err(I2oError::Timeout(self.config.deadline))
        });

        let mut flights = self.flights.lock().unwrap_or_else(|p| p.into_inner());
        if flights.get(name).is_some_and(|f| Arc::ptr_eq(f, flight)) {
            flights.remove(name);
        }
        result
    }

    /// Whether `name` is present locally with a valid completion marker.
    pub async fn is_verified(&self, name: &str) -> bool {
        match self.path_for(name) {
            Ok(path) => matches!(self.verified_local(name, &path).await, Ok(Some(_))),
            Err(_) => false,
        }
    }

    async fn fetch_locked(&self, name: &str, path: &Path) -> I2oResult<LocalFile> {
        if let Some(file) = self.verified_local(name, path).await? {
            debug!("Using verified local copy");
            return Ok(file);
        }
        self.download(name, path).await
    }

    /// Fast path. Anything short of marker plus matching size is discarded.
    async fn verified_local(&self, name: &str, path: &Path) -> I2oResult<Option<LocalFile>> {
        let marker_path = marker_path(path);

        let size = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                remove_if_exists(&marker_path).await;
                return Ok(None);
            }
        };

        let marker = match fs::read(&marker_path).await {
            Ok(raw) => match serde_json::from_slice::<CompletionMarker>(&raw) {
                Ok(marker) => marker,
                Err(e) => {
                    warn!(error = %e, "Unreadable completion marker, discarding");
                    remove_if_exists(&marker_path).await;
                    return Ok(None);
                }
            },
            Err(_) => {
                info!(size, "Local file has no completion marker, fetching again");
                return Ok(None);
            }
        };

        if marker.size_bytes != size {
            warn!(
                expected = marker.size_bytes,
                actual = size,
                "Local file size differs from its marker, fetching again"
            );
            remove_if_exists(&marker_path).await;
            return Ok(None);
        }

        if self.config.verify_checksum_on_reuse {
            let actual = sha256_file(path).await?;
            if actual != marker.sha256 {
                warn!("Local file checksum differs from its marker, fetching again");
                remove_if_exists(&marker_path).await;
                return Ok(None);
            }
        }

        Ok(Some(LocalFile {
            name: name.to_string(),
            path: path.to_path_buf(),
            size_bytes: size,
            sha256: marker.sha256,
        }))
    }

    async fn download(&self, name: &str, path: &Path) -> I2oResult<LocalFile> {
        let props = self.store.properties(&self.container, name).await?;
        let expected = props.size_bytes;
        let expected_sha = props.metadata.get(CONTENT_SHA256_KEY).map(|s| s.to_lowercase());
        let attempts = self.config.retry.attempts();
        let mut actual = 0;

        for attempt in 1..=attempts {
            let part = self
                .dir
                .join(format!("{}.{}.{}", name, uuid::Uuid::new_v4().simple(), PART_SUFFIX));

            match self.download_once(name, &part).await {
                Ok((size, sha)) => {
                    actual = size;
                    let hash_ok = expected_sha.as_deref().map_or(true, |h| h == sha);
                    if size == expected && hash_ok {
                        return self.commit(name, &part, path, size, sha, props.e_tag).await;
                    }
                    warn!(
                        attempt,
                        expected,
                        actual = size,
                        hash_ok,
                        "Downloaded file does not match remote"
                    );
                }
                Err(e) if e.is_not_found() => {
                    remove_if_exists(&part).await;
                    return Err(e);
                }
                Err(e) if attempt == attempts => {
                    remove_if_exists(&part).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Download attempt failed");
                }
            }

            remove_if_exists(&part).await;
            if attempt < attempts {
                tokio::time::sleep(self.config.retry.backoff_after(attempt)).await;
            }
        }

        Err(I2oError::Incomplete {
            name: name.to_string(),
            expected,
            actual,
            attempts,
        })
    }

    /// Stream one download into `part`. Returns the bytes written and their hash.
    async fn download_once(&self, name: &str, part: &Path) -> I2oResult<(u64, String)> {
        let write_error =
            |e: std::io::Error| I2oError::internal(format!("Failed to write {:?}: {}", part, e));

        let mut stream = self.store.get_stream(&self.container, name).await?;
        let mut file = fs::File::create(part).await.map_err(write_error)?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk).await.map_err(write_error)?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok((size, hex::encode(hasher.finalize())))
    }

    async fn commit(
        &self,
        name: &str,
        part: &Path,
        path: &Path,
        size_bytes: u64,
        sha256: String,
        e_tag: Option<String>,
    ) -> I2oResult<LocalFile> {
        let marker_path = marker_path(path);
        remove_if_exists(&marker_path).await;

        fs::rename(part, path)
            .await
            .map_err(|e| I2oError::internal(format!("Failed to move {:?} into place: {}", part, e)))?;

        let marker = CompletionMarker {
            size_bytes,
            sha256: sha256.clone(),
            fetched_at: Utc::now(),
            e_tag,
        };
        fs::write(&marker_path, serde_json::to_vec(&marker)?)
            .await
            .map_err(|e| I2oError::internal(format!("Failed to write marker: {}", e)))?;

        info!(size = size_bytes, "Fetched dataset");
        Ok(LocalFile {
            name: name.to_string(),
            path: path.to_path_buf(),
            size_bytes,
            sha256,
        })
    }

    /// Files in this container's directory, sorted by name.
    pub async fn list_local(&self) -> I2oResult<Vec<LocalFileInfo>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| I2oError::internal(format!("Failed to read {:?}: {}", self.dir, e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| I2oError::internal(format!("Failed to read {:?}: {}", self.dir, e)))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_bookkeeping(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let verified = matches!(
                self.verified_local(&name, &entry.path()).await,
                Ok(Some(_))
            );
            files.push(LocalFileInfo {
                name,
                size_bytes: meta.len(),
                verified,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Remove a local file and its marker. Waits for any in-flight fetch of it.
    pub async fn evict(&self, name: &str) -> I2oResult<bool> {
        let path = self.path_for(name)?;
        let lock = self.lock_for(name);

        let result = {
            let _guard = lock.lock().await;
            remove_if_exists(&marker_path(&path)).await;
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(name, "Evicted local file");
                    Ok(true)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(I2oError::internal(format!("Failed to remove {:?}: {}", path, e))),
            }
        };

        self.release(name, lock);
        result
    }

    /// Evict every local file smaller than `threshold` bytes.
    ///
    /// Also removes partial downloads older than the fetch deadline.
    pub async fn evict_smaller_than(&self, threshold: u64) -> I2oResult<Vec<EvictionOutcome>> {
        let (dir, max_age) = (self.dir.clone(), self.config.deadline);
        let swept = tokio::task::spawn_blocking(move || sweep_stale_parts(&dir, max_age))
            .await
            .map_err(|e| I2oError::internal(format!("Sweep task failed: {}", e)))?;
        if swept > 0 {
            info!(swept, "Removed stale partial downloads");
        }

        let mut outcomes = Vec::new();
        for file in self.list_local().await? {
            if file.size_bytes >= threshold {
                continue;
            }
            let outcome = match self.evict(&file.name).await {
                Ok(removed) => EvictionOutcome {
                    name: file.name,
                    size_bytes: file.size_bytes,
                    removed,
                    error: None,
                },
                Err(e) => EvictionOutcome {
                    name: file.name,
                    size_bytes: file.size_bytes,
                    removed: false,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(name.to_string()).or_default().clone()
    }

    /// Drop the per-name lock once nobody else holds or waits on it.
    fn release(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map plus ours
        if Arc::strong_count(&lock) <= 2 {
            map.remove(name);
        }
    }
}

fn validate_name(name: &str) -> I2oResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || is_bookkeeping(name);
    if bad {
        return Err(I2oError::invalid(
            "name",
            format!("'{}' is not a valid dataset file name", name),
        ));
    }
    Ok(())
}

fn is_bookkeeping(name: &str) -> bool {
    name.ends_with(&format!(".{}", MARKER_SUFFIX)) || name.ends_with(&format!(".{}", PART_SUFFIX))
}

fn marker_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".");
    p.push(MARKER_SUFFIX);
    PathBuf::from(p)
}

async fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove file");
        }
    }
}

async fn open_blocking<T, F>(open: F, file: LocalFile) -> I2oResult<T>
where
    F: FnOnce(&LocalFile) -> I2oResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || open(&file))
        .await
        .map_err(|e| I2oError::internal(format!("Open task failed: {}", e)))?
}

/// Remove `.part` files in `dir` not modified within `max_age`. Younger ones
/// may belong to a download still running in another process.
fn sweep_stale_parts(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(&format!(".{}", PART_SUFFIX)) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %name, error = %e, "Failed to remove partial download"),
        }
    }
    removed
}

async fn sha256_file(path: &Path) -> I2oResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok::<_, std::io::Error>(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| I2oError::internal(format!("Hash task failed: {}", e)))?
    .map_err(|e| I2oError::internal(format!("Failed to hash local file: {}", e)))
}
