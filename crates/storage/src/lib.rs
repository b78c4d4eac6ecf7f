//! Storage layer for ice2ocean services.
//!
//! - Remote blob stores (S3, Azure, in-memory) with per-object metadata
//! - Content-addressed cache of computed artifacts
//! - Verified local working set of model output files
//! - Processing-stage tracking for the batch pipeline

pub mod dataset;
pub mod fingerprint;
pub mod local_cache;
pub mod object_store;
pub mod processing;
pub mod result_cache;
pub mod retry;

pub use self::object_store::{
    Metadata, MetadataVersion, ObjectEntry, ObjectProperties, ObjectStorage,
    ObjectStorageConfig, RemoteObjectStore, RemoteStoreConfig, StorageBackend,
};
pub use dataset::{
    DatasetAcquirer, DatasetHandle, GridData, NetCdfDataset, NetCdfFormat, VariableData,
    NETCDF_SUPPORT,
};
pub use fingerprint::{fingerprint, scoped_fingerprint, CacheKey};
pub use local_cache::{
    CompletionMarker, EvictionOutcome, FetchConfig, LocalFile, LocalFileCache, LocalFileInfo,
    WorkDir, CONTENT_SHA256_KEY,
};
pub use processing::{ProcessingStage, ProcessingStateTracker, StageEntry};
pub use result_cache::{CacheEntry, Cached, Lookup, ResultCache, ResultCacheConfig};
pub use retry::RetryPolicy;
