//! In-memory backend for tests and dry runs.
//!
//! The backend is [`Clone`] so tests can hold a handle for direct inspection while the
//! [`Container`](crate::Container) owns a shared copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt};

use crate::backend::{Backend, PayloadStream};
use crate::error::BackendResult;

type Store = HashMap<(String, String), Bytes>;

/// A [`Backend`] backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, container: &str, blob: &str) -> Option<Bytes> {
        self.lock().get(&key(container, blob)).cloned()
    }

    /// Returns `true` if the backend contains the given blob.
    pub fn contains(&self, container: &str, blob: &str) -> bool {
        self.lock().contains_key(&key(container, blob))
    }

    /// Returns the number of stored blobs across all containers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the backend has no stored blobs.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        // A poisoned map is still consistent, every operation is a single insert or remove.
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key(container: &str, blob: &str) -> (String, String) {
    (container.to_owned(), blob.to_owned())
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_container(&self, _container: &str) -> BackendResult<()> {
        Ok(())
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        _len: u64,
        stream: PayloadStream,
    ) -> BackendResult<()> {
        let bytes: BytesMut = stream.try_collect().await?;
        self.lock().insert(key(container, blob), bytes.freeze());
        Ok(())
    }

    async fn get_blob(&self, container: &str, blob: &str) -> BackendResult<Option<PayloadStream>> {
        let entry = self.get_stored(container, blob);
        Ok(entry.map(|bytes| futures_util::stream::once(async move { Ok(bytes) }).boxed()))
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        self.lock().remove(&key(container, blob));
        Ok(())
    }
}
