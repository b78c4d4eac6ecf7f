//! A remote store fake that counts calls and misbehaves on request.
//!
//! Wraps an in-memory [`ObjectStorage`] and can:
//! - count `get` calls per object
//! - truncate `get` payloads for the first N calls (or forever)
//! - delay every `get`
//! - split streamed downloads into small chunks
//! - report every operation as unreachable

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use i2o_common::{I2oError, I2oResult};
use storage::{
    Metadata, MetadataVersion, ObjectEntry, ObjectProperties, ObjectStorage, RemoteObjectStore,
};

#[derive(Debug, Clone, Copy)]
struct Truncation {
    keep_bytes: usize,
    /// Number of gets to truncate; `None` truncates all of them
    remaining: Option<usize>,
}

pub struct ScriptedStore {
    inner: ObjectStorage,
    gets: Mutex<HashMap<String, usize>>,
    truncations: Mutex<HashMap<String, Truncation>>,
    get_delay: Mutex<Duration>,
    chunk_size: AtomicUsize,
    unreachable: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: ObjectStorage::in_memory(),
            gets: Mutex::new(HashMap::new()),
            truncations: Mutex::new(HashMap::new()),
            get_delay: Mutex::new(Duration::ZERO),
            chunk_size: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Seed an object.
    pub async fn seed(&self, container: &str, name: &str, data: impl Into<Bytes>) {
        self.inner
            .put(container, name, data.into(), "application/octet-stream")
            .await
            .expect("seeding the in-memory store cannot fail");
    }

    /// Return only the first `keep_bytes` bytes from the next `count` gets
    /// of this object, or from every get when `count` is `None`.
    pub fn truncate_gets(&self, container: &str, name: &str, keep_bytes: usize, count: Option<usize>) {
        self.truncations.lock().unwrap().insert(
            key(container, name),
            Truncation {
                keep_bytes,
                remaining: count,
            },
        );
    }

    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = delay;
    }

    /// Stream downloads in chunks of at most `size` bytes. Zero streams one chunk.
    pub fn set_chunk_size(&self, size: usize) {
        self.chunk_size.store(size, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// How many times `get` was called for this object.
    pub fn get_count(&self, container: &str, name: &str) -> usize {
        self.gets
            .lock()
            .unwrap()
            .get(&key(container, name))
            .copied()
            .unwrap_or(0)
    }

    /// The wrapped store, for direct inspection.
    pub fn inner(&self) -> &ObjectStorage {
        &self.inner
    }

    fn check_reachable(&self) -> I2oResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(I2oError::unreachable("scripted outage"))
        } else {
            Ok(())
        }
    }

    fn take_truncation(&self, k: &str) -> Option<usize> {
        let mut truncations = self.truncations.lock().unwrap();
        let t = truncations.get_mut(k)?;
        let keep = t.keep_bytes;
        match t.remaining {
            None => Some(keep),
            Some(0) => None,
            Some(n) => {
                t.remaining = Some(n - 1);
                Some(keep)
            }
        }
    }
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(container: &str, name: &str) -> String {
    format!("{}/{}", container, name)
}

#[async_trait]
impl RemoteObjectStore for ScriptedStore {
    async fn get(&self, container: &str, name: &str) -> I2oResult<Bytes> {
        let k = key(container, name);
        *self.gets.lock().unwrap().entry(k.clone()).or_default() += 1;

        let delay = *self.get_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_reachable()?;

        let data = self.inner.get(container, name).await?;
        match self.take_truncation(&k) {
            Some(keep) => Ok(data.slice(..keep.min(data.len()))),
            None => Ok(data),
        }
    }

    async fn get_stream(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<BoxStream<'static, I2oResult<Bytes>>> {
        let data = self.get(container, name).await?;
        let size = self.chunk_size.load(Ordering::SeqCst);
        if size == 0 || data.is_empty() {
            return Ok(stream::once(async move { Ok(data) }).boxed());
        }
        let chunks: Vec<I2oResult<Bytes>> = (0..data.len())
            .step_by(size)
            .map(|start| Ok(data.slice(start..(start + size).min(data.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> I2oResult<()> {
        self.check_reachable()?;
        self.inner.put(container, name, data, content_type).await
    }

    async fn delete(&self, container: &str, name: &str) -> I2oResult<()> {
        self.check_reachable()?;
        self.inner.delete(container, name).await
    }

    fn list_with_metadata<'a>(
        &'a self,
        container: &'a str,
    ) -> BoxStream<'a, I2oResult<ObjectEntry>> {
        if let Err(e) = self.check_reachable() {
            return stream::once(async move { Err(e) }).boxed();
        }
        self.inner.list_with_metadata(container)
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: Metadata,
    ) -> I2oResult<()> {
        self.check_reachable()?;
        self.inner.set_metadata(container, name, metadata).await
    }

    async fn get_metadata_versioned(
        &self,
        container: &str,
        name: &str,
    ) -> I2oResult<(Metadata, MetadataVersion)> {
        self.check_reachable()?;
        self.inner.get_metadata_versioned(container, name).await
    }

    async fn set_metadata_if(
        &self,
        container: &str,
        name: &str,
        metadata: Metadata,
        expected: &MetadataVersion,
    ) -> I2oResult<bool> {
        self.check_reachable()?;
        self.inner
            .set_metadata_if(container, name, metadata, expected)
            .await
    }

    async fn properties(&self, container: &str, name: &str) -> I2oResult<ObjectProperties> {
        self.check_reachable()?;
        self.inner.properties(container, name).await
    }
}
