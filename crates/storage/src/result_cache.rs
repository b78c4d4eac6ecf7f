//! Remote cache of computed artifacts keyed by request fingerprint.
//!
//! Entries are immutable once written. A key is a digest of the inputs, so a
//! new input always lands on a new key and nothing expires on its own; entries
//! are removed only by [`ResultCache::invalidate`] or [`ResultCache::clear`].

use bytes::Bytes;
use futures::TryStreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use i2o_common::I2oResult;

use crate::fingerprint::CacheKey;
use crate::object_store::RemoteObjectStore;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Bytes),
    Miss,
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Result cache behavior knobs.
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    /// Container holding cached artifacts
    pub container: String,
    /// Treat an unreachable store as a miss instead of failing the request
    pub fail_open: bool,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            container: "ice2oceans".to_string(),
            fail_open: false,
        }
    }
}

/// Listing entry for administrative views.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub size_bytes: u64,
}

/// Sole writer of cached artifacts.
pub struct ResultCache {
    store: Arc<dyn RemoteObjectStore>,
    config: ResultCacheConfig,
}

impl ResultCache {
    pub fn new(store: Arc<dyn RemoteObjectStore>, config: ResultCacheConfig) -> Self {
        Self { store, config }
    }

    pub fn container(&self) -> &str {
        &self.config.container
    }

    /// NotFound is a Miss. Infrastructure failures surface unless `fail_open`.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn lookup(&self, key: &CacheKey) -> I2oResult<Lookup> {
        match self.store.get(&self.config.container, key.as_str()).await {
            Ok(bytes) => {
                debug!(size = bytes.len(), "Result cache hit");
                Ok(Lookup::Hit(bytes))
            }
            Err(e) if e.is_not_found() => {
                debug!("Result cache miss");
                Ok(Lookup::Miss)
            }
            Err(e) if self.config.fail_open => {
                warn!(error = %e, "Result cache unreadable, recomputing");
                Ok(Lookup::Miss)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn store(&self, key: &CacheKey, data: Bytes, content_type: &str) -> I2oResult<()> {
        self.store
            .put(&self.config.container, key.as_str(), data, content_type)
            .await
    }

    /// Remove one entry. Returns `false` if it was not cached.
    pub async fn invalidate(&self, key: &CacheKey) -> I2oResult<bool> {
        match self.store.delete(&self.config.container, key.as_str()).await {
            Ok(()) => {
                info!(key = %key, "Invalidated cached result");
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn entries(&self) -> I2oResult<Vec<CacheEntry>> {
        self.store
            .list_with_metadata(&self.config.container)
            .map_ok(|entry| CacheEntry {
                key: entry.name,
                size_bytes: entry.size_bytes,
            })
            .try_collect()
            .await
    }

    /// Delete every cached artifact, returning how many were removed.
    pub async fn clear(&self) -> I2oResult<usize> {
        let entries = self.entries().await?;
        let mut removed = 0;
        for entry in entries {
            match self.store.delete(&self.config.container, &entry.key).await {
                Ok(()) => removed += 1,
                // Someone else cleared it first
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        info!(removed, container = %self.config.container, "Cleared result cache");
        Ok(removed)
    }

    /// Serve from cache, or compute, store and return.
    ///
    /// A failed store is logged; the computed bytes are still returned.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        content_type: &str,
        compute: F,
    ) -> I2oResult<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = I2oResult<Bytes>>,
    {
        if let Lookup::Hit(bytes) = self.lookup(key).await? {
            return Ok(Cached { bytes, hit: true });
        }

        let bytes = compute().await?;
        if let Err(e) = self.store(key, bytes.clone(), content_type).await {
            warn!(key = %key, error = %e, "Failed to persist computed result");
        }
        Ok(Cached { bytes, hit: false })
    }
}

/// Bytes returned by [`ResultCache::get_or_compute`], with where they came from.
#[derive(Debug, Clone)]
pub struct Cached {
    pub bytes: Bytes,
    pub hit: bool,
}

impl From<Cached> for Bytes {
    fn from(c: Cached) -> Self {
        c.bytes
    }
}
