//! The storage layer used by the blob tester.
//!
//! This crate wraps the object storage backends behind a single [`Backend`] trait and exposes a
//! [`Container`] handle that the test engine uses to upload, download and delete blobs. Payloads
//! are always passed as streams, so neither direction ever buffers a full blob in memory.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod backend;
mod error;

use std::pin::pin;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;

pub use crate::backend::{
    AzureBackend, AzureCredentials, Backend, InMemoryBackend, LocalFsBackend, PayloadStream,
    SharedBackend, StorageConfig,
};
pub use crate::error::{BackendError, BackendResult};

/// A handle to a container within a storage backend.
///
/// Cloning is cheap, all clones share the same backend.
#[derive(Clone, Debug)]
pub struct Container {
    backend: SharedBackend,
    name: String,
}

impl Container {
    /// Creates the container on the backend unless it exists already, and returns a handle to it.
    pub async fn create_if_absent(
        backend: SharedBackend,
        name: impl Into<String>,
    ) -> BackendResult<Self> {
        let name = name.into();

        backend.create_container(&name).await?;
        tracing::debug!(backend = backend.name(), container = %name, "container ready");

        Ok(Self { backend, name })
    }

    /// The name of this container.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the backend storing this container, used for diagnostics.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Uploads `len` bytes from `stream` into the blob named `blob`.
    pub async fn upload(&self, blob: &str, len: u64, stream: PayloadStream) -> BackendResult<()> {
        self.backend.put_blob(&self.name, blob, len, stream).await
    }

    /// Downloads the blob named `blob` into `sink` and returns the number of bytes written.
    ///
    /// A blob that does not exist is reported as [`BackendError::BlobNotFound`].
    pub async fn download<W>(&self, blob: &str, sink: &mut W) -> BackendResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let stream = self
            .backend
            .get_blob(&self.name, blob)
            .await?
            .ok_or_else(|| BackendError::BlobNotFound {
                container: self.name.clone(),
                blob: blob.to_owned(),
            })?;

        let mut reader = pin!(StreamReader::new(stream));
        let written = tokio::io::copy(&mut reader, sink).await?;
        sink.flush().await?;

        Ok(written)
    }

    /// Deletes the blob named `blob`, succeeding if it does not exist.
    pub async fn delete_if_exists(&self, blob: &str) -> BackendResult<()> {
        self.backend.delete_blob(&self.name, blob).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use futures_util::StreamExt;

    use super::*;

    fn make_stream(contents: &'static [u8]) -> PayloadStream {
        futures_util::stream::once(async move { Ok(Bytes::from_static(contents)) }).boxed()
    }

    #[tokio::test]
    async fn upload_download_delete() {
        let backend = InMemoryBackend::new();
        let container = Container::create_if_absent(Arc::new(backend.clone()), "blobtest")
            .await
            .unwrap();

        container
            .upload("greeting", 7, make_stream(b"oh hai!"))
            .await
            .unwrap();
        assert!(backend.contains("blobtest", "greeting"));

        let mut sink = Vec::new();
        let written = container.download("greeting", &mut sink).await.unwrap();
        assert_eq!(written, 7);
        assert_eq!(sink, b"oh hai!");

        container.delete_if_exists("greeting").await.unwrap();
        assert!(backend.is_empty());

        // deleting twice is fine
        container.delete_if_exists("greeting").await.unwrap();
    }

    #[tokio::test]
    async fn download_missing_blob() {
        let container = Container::create_if_absent(Arc::new(InMemoryBackend::new()), "blobtest")
            .await
            .unwrap();

        let err = container
            .download("missing", &mut tokio::io::sink())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::BlobNotFound { .. }));
    }
}
