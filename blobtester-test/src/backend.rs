//! A fault-injecting storage backend.
//!
//! [`FaultyBackend`] stores blobs in an [`InMemoryBackend`] and can be configured to fail or
//! corrupt individual operations, which lets tests observe how the engine contains failures.
//!
//! ```
//! use blobtester_test::backend::FaultyBackend;
//!
//! let backend = FaultyBackend::builder().corrupting_downloads().build();
//! assert_eq!(backend.uploads(), 0);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blobtester_service::{
    Backend, BackendError, BackendResult, InMemoryBackend, PayloadStream, SharedBackend,
};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

/// Builder for a [`FaultyBackend`].
#[derive(Debug, Default)]
pub struct FaultyBackendBuilder {
    fail_uploads: Option<Option<usize>>,
    truncate_uploads: bool,
    fail_downloads: bool,
    corrupt_downloads: bool,
    fail_deletes: bool,
    upload_delay: Duration,
}

impl FaultyBackendBuilder {
    /// Every upload stores the blob and then reports an error.
    pub fn failing_uploads(mut self) -> Self {
        self.fail_uploads = Some(None);
        self
    }

    /// Only the upload with the given zero-based ordinal fails.
    pub fn failing_upload(mut self, ordinal: usize) -> Self {
        self.fail_uploads = Some(Some(ordinal));
        self
    }

    /// Every upload stores only the first chunk of the payload and reports success.
    pub fn truncating_uploads(mut self) -> Self {
        self.truncate_uploads = true;
        self
    }

    /// Every download fails before any byte is returned.
    pub fn failing_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    /// Every download returns the stored bytes with the first byte flipped.
    pub fn corrupting_downloads(mut self) -> Self {
        self.corrupt_downloads = true;
        self
    }

    /// Every delete fails, leaving the blob in place.
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Delays every upload before it reads the payload.
    pub fn upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Creates the backend.
    pub fn build(self) -> FaultyBackend {
        FaultyBackend(Arc::new(Inner {
            store: InMemoryBackend::new(),
            config: self,
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            peak_blobs: AtomicUsize::new(0),
        }))
    }
}

/// An in-memory backend with injected faults and operation counters.
///
/// Clones share state, so a test can keep one handle for inspection.
#[derive(Clone, Debug)]
pub struct FaultyBackend(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    store: InMemoryBackend,
    config: FaultyBackendBuilder,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    deletes: AtomicUsize,
    peak_blobs: AtomicUsize,
}

impl FaultyBackend {
    /// Returns a builder for a backend without any faults.
    pub fn builder() -> FaultyBackendBuilder {
        FaultyBackendBuilder::default()
    }

    /// Returns a type-erased handle sharing this backend's state.
    pub fn shared(&self) -> SharedBackend {
        Arc::new(self.clone())
    }

    /// The underlying store.
    pub fn store(&self) -> &InMemoryBackend {
        &self.0.store
    }

    /// Number of started uploads.
    pub fn uploads(&self) -> usize {
        self.0.uploads.load(Ordering::SeqCst)
    }

    /// Number of started downloads.
    pub fn downloads(&self) -> usize {
        self.0.downloads.load(Ordering::SeqCst)
    }

    /// Number of attempted deletes.
    pub fn deletes(&self) -> usize {
        self.0.deletes.load(Ordering::SeqCst)
    }

    /// The highest number of blobs that were stored at the same time.
    pub fn peak_blobs(&self) -> usize {
        self.0.peak_blobs.load(Ordering::SeqCst)
    }
}

fn injected(operation: &str) -> BackendError {
    BackendError::Io(std::io::Error::other(format!("injected {operation} fault")))
}

#[async_trait::async_trait]
impl Backend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn create_container(&self, container: &str) -> BackendResult<()> {
        self.0.store.create_container(container).await
    }

    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        len: u64,
        stream: PayloadStream,
    ) -> BackendResult<()> {
        let ordinal = self.0.uploads.fetch_add(1, Ordering::SeqCst);
        if !self.0.config.upload_delay.is_zero() {
            tokio::time::sleep(self.0.config.upload_delay).await;
        }

        let stream = if self.0.config.truncate_uploads {
            let mut stream = stream;
            let first = stream.next().await.transpose()?;
            let chunks = first.map(Ok::<_, std::io::Error>);
            futures_util::stream::iter(chunks).boxed()
        } else {
            stream
        };

        self.0.store.put_blob(container, blob, len, stream).await?;
        self.0
            .peak_blobs
            .fetch_max(self.0.store.len(), Ordering::SeqCst);

        match self.0.config.fail_uploads {
            Some(None) => Err(injected("upload")),
            Some(Some(failing)) if failing == ordinal => Err(injected("upload")),
            _ => Ok(()),
        }
    }

    async fn get_blob(&self, container: &str, blob: &str) -> BackendResult<Option<PayloadStream>> {
        self.0.downloads.fetch_add(1, Ordering::SeqCst);
        if self.0.config.fail_downloads {
            return Err(injected("download"));
        }

        if !self.0.config.corrupt_downloads {
            return self.0.store.get_blob(container, blob).await;
        }

        let Some(stored) = self.0.store.get_stored(container, blob) else {
            return Ok(None);
        };
        let mut corrupted = BytesMut::from(stored.as_ref());
        if let Some(first) = corrupted.first_mut() {
            *first ^= 0xff;
        }
        let bytes: Bytes = corrupted.freeze();
        Ok(Some(
            futures_util::stream::once(async move { Ok(bytes) }).boxed(),
        ))
    }

    async fn delete_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        self.0.deletes.fetch_add(1, Ordering::SeqCst);
        if self.0.config.fail_deletes {
            return Err(injected("delete"));
        }
        self.0.store.delete_blob(container, blob).await
    }
}
