use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::error::BackendResult;

mod azure;
mod in_memory;
mod local_fs;

pub use azure::{AzureBackend, AzureCredentials};
pub use in_memory::InMemoryBackend;
pub use local_fs::LocalFsBackend;

/// Type alias for data streams passed into uploads and returned from downloads.
pub type PayloadStream = BoxStream<'static, std::io::Result<bytes::Bytes>>;

/// A type-erased [`Backend`] shared between all workers.
pub type SharedBackend = Arc<dyn Backend>;

/// Primitive blob operations of a storage service.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Creates the container, succeeding if it already exists.
    async fn create_container(&self, container: &str) -> BackendResult<()>;

    /// Stores exactly `len` bytes read from `stream` as a blob.
    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        len: u64,
        stream: PayloadStream,
    ) -> BackendResult<()>;

    /// Retrieves a blob as a stream of bytes, or `None` if it does not exist.
    async fn get_blob(&self, container: &str, blob: &str) -> BackendResult<Option<PayloadStream>>;

    /// Deletes a blob, succeeding if it does not exist.
    async fn delete_blob(&self, container: &str, blob: &str) -> BackendResult<()>;
}

/// Configuration to construct a [`Backend`].
#[derive(Debug)]
pub enum StorageConfig {
    /// An Azure Blob Storage account.
    Azure {
        /// Account name and key.
        credentials: AzureCredentials,
        /// Whether requests use `https`.
        use_https: bool,
        /// Overrides the account endpoint, e.g. for a local storage emulator.
        endpoint: Option<String>,
    },
    /// Stores blobs as files below a local directory.
    FileSystem {
        /// The directory holding one subdirectory per container.
        path: PathBuf,
    },
    /// Keeps blobs in memory for the lifetime of the process.
    InMemory,
}

impl StorageConfig {
    /// Constructs the configured backend.
    pub fn into_backend(self) -> BackendResult<SharedBackend> {
        Ok(match self {
            StorageConfig::Azure {
                credentials,
                use_https,
                endpoint,
            } => Arc::new(AzureBackend::new(credentials, use_https, endpoint)?),
            StorageConfig::FileSystem { path } => Arc::new(LocalFsBackend::new(&path)),
            StorageConfig::InMemory => Arc::new(InMemoryBackend::new()),
        })
    }
}
