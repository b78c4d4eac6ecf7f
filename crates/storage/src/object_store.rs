//! Remote blob storage (S3, Azure or in-memory) behind a small capability trait.
//!
//! Objects are addressed by `(container, name)`. Per-object metadata and the
//! content type live in a sidecar JSON document so that every backend offers
//! the same metadata semantics, including conditional (compare-and-swap)
//! updates guarded by the sidecar's ETag.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use object_store::{
    aws::{AmazonS3Builder, S3ConditionalPut},
    azure::MicrosoftAzureBuilder,
    memory::InMemory,
    path::Path,
    ObjectStore, PutMode, PutOptions, UpdateVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use tracing::{debug, instrument};

use i2o_common::{I2oError, I2oResult};

/// Free-form string metadata attached to a remote object.
pub type Metadata = BTreeMap<String, String>;

/// Prefix under which sidecar metadata documents are kept.
const METADATA_PREFIX: &str = "_metadata";

/// Opaque version token of an object's metadata document.
///
/// `None` means no metadata has ever been written for the object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataVersion(pub Option<String>);

/// Authoritative properties of a remote object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectProperties {
    pub size_bytes: u64,
    pub content_type: Option<String>,
    pub e_tag: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub metadata: Metadata,
}

/// One entry produced by [`RemoteObjectStore::list_with_metadata`].
#[derive(Debug, Clone, Serialize)]
pub struct ObjectEntry {
    pub name: String,
    pub size_bytes: u64,
    pub metadata: Metadata,
}

/// Minimal capability interface over a remote blob namespace.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Fetch an object's payload. NotFound when absent.
    async fn get(&self, container: &str, name: &str) -> I2oResult<Bytes>;

    /// Fetch an object's payload as a stream of chunks.
    ///
    /// NotFound when absent. The default reads the whole payload with
    /// [`get`](Self::get) and yields it as one chunk.
    async fn get_stream(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<BoxStream<'static, I2oResult<Bytes>>> {
        let data = self.get(container, name).await?;
        Ok(futures::stream::once(async move { Ok(data) }).boxed())
    }

    /// Write an object, overwriting any previous payload and resetting its metadata.
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> I2oResult<()>;

    /// Remove an object. NotFound when absent.
    async fn delete(&self, container: &str, name: &str) -> I2oResult<()>;

    /// Lazily enumerate a container. Calling again restarts from the beginning.
    fn list_with_metadata<'a>(&'a self, container: &'a str)
        -> BoxStream<'a, I2oResult<ObjectEntry>>;

    async fn get_metadata(&self, container: &str, name: &str) -> I2oResult<Metadata> {
        Ok(self.get_metadata_versioned(container, name).await?.0)
    }

    /// Replace the whole metadata map.
    async fn set_metadata(&self, container: &str, name: &str, metadata: Metadata)
        -> I2oResult<()>;

    async fn get_metadata_versioned(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<(Metadata, MetadataVersion)>;

    /// Replace the metadata map only if it is still at `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    async fn set_metadata_if(
        &self,
        container: &str,
        name: &str,
        metadata: Metadata,
        expected: &MetadataVersion,
    ) -> I2oResult<bool>;

    async fn properties(&self, container: &str, name: &str) -> I2oResult<ObjectProperties>;
}

/// Which backend an [`ObjectStorage`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Azure,
    Memory,
}

/// Connection settings for one remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    pub backend: StorageBackend,
    /// Account name (Azure) or access key id (S3)
    pub account: String,
    /// Account key (Azure) or secret access key (S3)
    pub access_key: String,
    /// Bucket (S3) or storage container (Azure) holding every logical container
    pub bucket: String,
    /// Custom S3 endpoint, e.g. MinIO
    pub endpoint: Option<String>,
    pub region: String,
    pub allow_http: bool,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            account: String::new(),
            access_key: String::new(),
            bucket: "ice2ocean".to_string(),
            endpoint: None,
            region: "us-east-1".to_string(),
            allow_http: false,
        }
    }
}

impl ObjectStorageConfig {
    /// Read `{prefix}_BACKEND`, `{prefix}_ACCOUNT`, `{prefix}_ACCESS_KEY`,
    /// `{prefix}_BUCKET`, `{prefix}_ENDPOINT`, `{prefix}_REGION` and
    /// `{prefix}_ALLOW_HTTP`.
    pub fn from_env(prefix: &str) -> I2oResult<Self> {
        let var = |suffix: &str| env::var(format!("{}_{}", prefix, suffix)).ok();
        let defaults = Self::default();

        let backend = match var("BACKEND").as_deref() {
            None | Some("memory") => StorageBackend::Memory,
            Some("s3") => StorageBackend::S3,
            Some("azure") => StorageBackend::Azure,
            Some(other) => {
                return Err(I2oError::internal(format!(
                    "{}_BACKEND must be one of s3, azure, memory (got '{}')",
                    prefix, other
                )))
            }
        };

        Ok(Self {
            backend,
            account: var("ACCOUNT").unwrap_or_default(),
            access_key: var("ACCESS_KEY").unwrap_or_default(),
            bucket: var("BUCKET").unwrap_or(defaults.bucket),
            endpoint: var("ENDPOINT"),
            region: var("REGION").unwrap_or(defaults.region),
            allow_http: var("ALLOW_HTTP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }
}

/// One logical remote store: connection settings plus the container used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    pub storage: ObjectStorageConfig,
    pub container: String,
}

impl RemoteStoreConfig {
    /// Connection settings from `{prefix}_*`, container from `{prefix}_CONTAINER`.
    pub fn from_env(prefix: &str, default_container: &str) -> I2oResult<Self> {
        Ok(Self {
            storage: ObjectStorageConfig::from_env(prefix)?,
            container: env::var(format!("{}_CONTAINER", prefix))
                .unwrap_or_else(|_| default_container.to_string()),
        })
    }

    pub fn connect(&self) -> I2oResult<ObjectStorage> {
        ObjectStorage::new(&self.storage)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

/// [`RemoteObjectStore`] backed by the `object_store` crate.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStorage {
    pub fn new(config: &ObjectStorageConfig) -> I2oResult<Self> {
        let store: Arc<dyn ObjectStore> = match config.backend {
            StorageBackend::Memory => Arc::new(InMemory::new()),
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&config.bucket)
                    .with_access_key_id(&config.account)
                    .with_secret_access_key(&config.access_key)
                    .with_region(&config.region)
                    .with_allow_http(config.allow_http)
                    .with_conditional_put(S3ConditionalPut::ETagMatch);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                Arc::new(builder.build().map_err(|e| {
                    I2oError::internal(format!("Failed to create S3 client: {}", e))
                })?)
            }
            StorageBackend::Azure => {
                let builder = MicrosoftAzureBuilder::new()
                    .with_account(&config.account)
                    .with_access_key(&config.access_key)
                    .with_container_name(&config.bucket)
                    .with_allow_http(config.allow_http);
                Arc::new(builder.build().map_err(|e| {
                    I2oError::internal(format!("Failed to create Azure client: {}", e))
                })?)
            }
        };

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
        })
    }

    /// Fresh in-process store, used by tests and local development.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            bucket: "memory".to_string(),
        }
    }

    fn data_path(container: &str, name: &str) -> Path {
        Path::from(format!("{}/{}", container, name))
    }

    fn sidecar_path(container: &str, name: &str) -> Path {
        Path::from(format!("{}/{}/{}.json", METADATA_PREFIX, container, name))
    }

    async fn head_data(&self, container: &str, name: &str) -> I2oResult<object_store::ObjectMeta> {
        self.store
            .head(&Self::data_path(container, name))
            .await
            .map_err(|e| map_store_error(e, container, name))
    }

    /// Read the sidecar, returning its ETag as the metadata version.
    async fn read_sidecar(&self, container: &str, name: &str) -> I2oResult<(Sidecar, MetadataVersion)> {
        match self.store.get(&Self::sidecar_path(container, name)).await {
            Ok(result) => {
                let e_tag = result.meta.e_tag.clone();
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| map_store_error(e, container, name))?;
                let sidecar: Sidecar = serde_json::from_slice(&bytes)?;
                Ok((sidecar, MetadataVersion(e_tag)))
            }
            Err(object_store::Error::NotFound { .. }) => {
                Ok((Sidecar::default(), MetadataVersion(None)))
            }
            Err(e) => Err(map_store_error(e, container, name)),
        }
    }

    async fn write_sidecar(
        &self,
        container: &str,
        name: &str,
        sidecar: &Sidecar,
        mode: PutMode,
    ) -> Result<(), object_store::Error> {
        let body = serde_json::to_vec(sidecar).map_err(|e| object_store::Error::Generic {
            store: "sidecar",
            source: Box::new(e),
        })?;
        let opts = PutOptions::from(mode);
        self.store
            .put_opts(&Self::sidecar_path(container, name), Bytes::from(body), opts)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteObjectStore for ObjectStorage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, container: &str, name: &str) -> I2oResult<Bytes> {
        let result = self
            .store
            .get(&Self::data_path(container, name))
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get_stream(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<BoxStream<'static, I2oResult<Bytes>>> {
        let result = self
            .store
            .get(&Self::data_path(container, name))
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        let (container, name) = (container.to_string(), name.to_string());
        Ok(result
            .into_stream()
            .map_err(move |e| map_store_error(e, &container, &name))
            .boxed())
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, size = data.len()))]
    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> I2oResult<()> {
        self.store
            .put(&Self::data_path(container, name), data)
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        let sidecar = Sidecar {
            content_type: Some(content_type.to_string()),
            metadata: Metadata::new(),
        };
        self.write_sidecar(container, name, &sidecar, PutMode::Overwrite)
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        debug!("Wrote object");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, container: &str, name: &str) -> I2oResult<()> {
        // Most backends treat deleting a missing key as success
        self.head_data(container, name).await?;

        self.store
            .delete(&Self::data_path(container, name))
            .await
            .map_err(|e| map_store_error(e, container, name))?;

        match self.store.delete(&Self::sidecar_path(container, name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_store_error(e, container, name)),
        }
    }

    fn list_with_metadata<'a>(
        &'a self,
        container: &'a str,
    ) -> BoxStream<'a, I2oResult<ObjectEntry>> {
        let prefix = Path::from(container);
        let strip = format!("{}/", container);

        self.store
            .list(Some(&prefix))
            .map_err(move |e| map_store_error(e, container, "*"))
            .and_then(move |meta| {
                let name = meta
                    .location
                    .as_ref()
                    .strip_prefix(strip.as_str())
                    .unwrap_or(meta.location.as_ref())
                    .to_string();
                async move {
                    let (sidecar, _) = self.read_sidecar(container, &name).await?;
                    Ok(ObjectEntry {
                        name,
                        size_bytes: meta.size as u64,
                        metadata: sidecar.metadata,
                    })
                }
            })
            .boxed()
    }

    #[instrument(skip(self, metadata), fields(bucket = %self.bucket))]
    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: Metadata,
    ) -> I2oResult<()> {
        self.head_data(container, name).await?;
        let (mut sidecar, _) = self.read_sidecar(container, name).await?;
        sidecar.metadata = metadata;

        self.write_sidecar(container, name, &sidecar, PutMode::Overwrite)
            .await
            .map_err(|e| map_store_error(e, container, name))
    }

    async fn get_metadata_versioned(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<(Metadata, MetadataVersion)> {
        self.head_data(container, name).await?;
        let (sidecar, version) = self.read_sidecar(container, name).await?;
        Ok((sidecar.metadata, version))
    }

    #[instrument(skip(self, metadata), fields(bucket = %self.bucket))]
    async fn set_metadata_if(
        &self,
        container: &str,
        name: &str,
        metadata: Metadata,
        expected: &MetadataVersion,
    ) -> I2oResult<bool> {
        self.head_data(container, name).await?;
        let (mut sidecar, _) = self.read_sidecar(container, name).await?;
        sidecar.metadata = metadata;

        let mode = match &expected.0 {
            None => PutMode::Create,
            Some(e_tag) => PutMode::Update(UpdateVersion {
                e_tag: Some(e_tag.clone()),
                version: None,
            }),
        };

        match self.write_sidecar(container, name, &sidecar, mode).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::AlreadyExists { .. }) => {
                debug!("Conditional metadata update lost");
                Ok(false)
            }
            Err(e) => Err(map_store_error(e, container, name)),
        }
    }

    async fn properties(&self, container: &str, name: &str) -> I2oResult<ObjectProperties> {
        let meta = self.head_data(container, name).await?;
        let (sidecar, _) = self.read_sidecar(container, name).await?;

        Ok(ObjectProperties {
            size_bytes: meta.size as u64,
            content_type: sidecar.content_type,
            e_tag: meta.e_tag,
            last_modified: meta.last_modified,
            metadata: sidecar.metadata,
        })
    }
}

/// NotFound stays NotFound; everything else is an infrastructure failure.
fn map_store_error(err: object_store::Error, container: &str, name: &str) -> I2oError {
    match err {
        object_store::Error::NotFound { .. } => {
            I2oError::NotFound(format!("{}/{}", container, name))
        }
        other => I2oError::unreachable(format!("{}/{}: {}", container, name, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_and_properties() {
        let store = ObjectStorage::in_memory();
        store
            .put("snowmodel", "roff.dat", Bytes::from_static(b"abcd"), "application/octet-stream")
            .await
            .unwrap();

        assert_eq!(store.get("snowmodel", "roff.dat").await.unwrap(), "abcd");

        let props = store.properties("snowmodel", "roff.dat").await.unwrap();
        assert_eq!(props.size_bytes, 4);
        assert_eq!(props.content_type.as_deref(), Some("application/octet-stream"));
        assert!(props.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_get_stream_yields_whole_payload() {
        let store = ObjectStorage::in_memory();
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        store
            .put("snowmodel", "swe.nc", Bytes::from(payload.clone()), "application/x-netcdf")
            .await
            .unwrap();

        let chunks: Vec<Bytes> = store
            .get_stream("snowmodel", "swe.nc")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), payload);

        let err = match store.get_stream("snowmodel", "missing.nc").await {
            Ok(_) => panic!("expected NotFound"),
            Err(e) => e,
        };
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = ObjectStorage::in_memory();
        assert!(store.get("c", "nope").await.unwrap_err().is_not_found());
        assert!(store.delete("c", "nope").await.unwrap_err().is_not_found());
        assert!(store.properties("c", "nope").await.unwrap_err().is_not_found());
        assert!(store
            .set_metadata("c", "nope", Metadata::new())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_set_metadata_replaces_whole_map() {
        let store = ObjectStorage::in_memory();
        store.put("c", "a", Bytes::from_static(b"x"), "text/plain").await.unwrap();

        let mut first = Metadata::new();
        first.insert("Owner".into(), "glacier-team".into());
        store.set_metadata("c", "a", first).await.unwrap();

        let mut second = Metadata::new();
        second.insert("ProcessingStage".into(), "Started".into());
        store.set_metadata("c", "a", second.clone()).await.unwrap();

        assert_eq!(store.get_metadata("c", "a").await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_put_resets_metadata() {
        let store = ObjectStorage::in_memory();
        store.put("c", "a", Bytes::from_static(b"x"), "text/plain").await.unwrap();
        let mut md = Metadata::new();
        md.insert("ProcessingStage".into(), "Completed".into());
        store.set_metadata("c", "a", md).await.unwrap();

        store.put("c", "a", Bytes::from_static(b"y"), "text/plain").await.unwrap();
        assert!(store.get_metadata("c", "a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conditional_update_detects_conflict() {
        let store = ObjectStorage::in_memory();
        store.put("c", "a", Bytes::from_static(b"x"), "text/plain").await.unwrap();

        let (_, version) = store.get_metadata_versioned("c", "a").await.unwrap();

        let mut mine = Metadata::new();
        mine.insert("ProcessingStage".into(), "Processing".into());
        assert!(store
            .set_metadata_if("c", "a", mine.clone(), &version)
            .await
            .unwrap());

        // Same stale version a second time loses
        assert!(!store.set_metadata_if("c", "a", mine, &version).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_with_metadata_is_restartable() {
        let store = ObjectStorage::in_memory();
        for name in ["b.nc", "a.nc"] {
            store.put("snowmodel", name, Bytes::from_static(b"1"), "application/x-netcdf")
                .await
                .unwrap();
        }
        store.put("other", "z.nc", Bytes::from_static(b"1"), "application/x-netcdf")
            .await
            .unwrap();

        let first: Vec<ObjectEntry> = store
            .list_with_metadata("snowmodel")
            .try_collect()
            .await
            .unwrap();
        let second: Vec<ObjectEntry> = store
            .list_with_metadata("snowmodel")
            .try_collect()
            .await
            .unwrap();

        let mut names: Vec<_> = first.iter().map(|e| e.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a.nc", "b.nc"]);
        assert_eq!(first.len(), second.len());
    }
}
