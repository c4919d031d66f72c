use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::pin;

use futures_util::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::backend::{Backend, PayloadStream};
use crate::error::{BackendError, BackendResult};

/// A [`Backend`] storing every container as a directory and every blob as a file.
#[derive(Debug)]
pub struct LocalFsBackend {
    path: PathBuf,
}

impl LocalFsBackend {
    /// Creates a backend rooted at `path`.
    pub fn new(path: &Path) -> Self {
        Self { path: path.into() }
    }

    fn blob_path(&self, container: &str, blob: &str) -> BackendResult<PathBuf> {
        for name in [container, blob] {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(BackendError::InvalidName {
                    name: name.to_owned(),
                    reason: "must be a single path component",
                });
            }
        }
        Ok(self.path.join(container).join(blob))
    }
}

#[async_trait::async_trait]
impl Backend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "local-fs"
    }

    async fn create_container(&self, container: &str) -> BackendResult<()> {
        let path = self.blob_path(container, "_")?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, stream))]
    async fn put_blob(
        &self,
        container: &str,
        blob: &str,
        _len: u64,
        stream: PayloadStream,
    ) -> BackendResult<()> {
        let path = self.blob_path(container, blob)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        let mut reader = pin!(StreamReader::new(stream));
        let mut writer = BufWriter::new(file);

        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_data().await?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_blob(&self, container: &str, blob: &str) -> BackendResult<Option<PayloadStream>> {
        let path = self.blob_path(container, blob)?;
        let file = match OpenOptions::new().read(true).open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("blob not found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Some(ReaderStream::new(file).boxed()))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_blob(&self, container: &str, blob: &str) -> BackendResult<()> {
        let path = self.blob_path(container, blob)?;
        match tokio::fs::remove_file(path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            result => Ok(result?),
        }
    }
}
