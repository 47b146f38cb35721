use std::path::{Component, Path, PathBuf};
use bytes::Bytes;
use super::{BlobReader, Storage, StorageError};
use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};

// Local filesystem storage
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf, // Base directory where blobs are stored
}

impl LocalStorage {
    /// Creates a new LocalStorage instance and ensures the blob directory exists
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("files")).await?;
        Ok(Self { base_path })
    }

    /// Resolves a key below the base directory. Keys are server-generated, but
    /// anything that could climb out of the base directory is still refused.
    fn get_full_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {

    /// Writes content to a file on the local filesystem
    async fn upload(&self, key: &str, content: Bytes) -> Result<(), StorageError> {
        let full_path = self.get_full_path(key)?;

        // Ensure parent directories exist
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let write = async {
            // create_new: keys are unique, an existing file means a key was reused
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&full_path)
                .await?;
            file.write_all(&content).await?;
            file.sync_all().await
        };

        if let Err(e) = write.await {
            // Don't leave a truncated blob behind
            let _ = fs::remove_file(&full_path).await;
            return Err(StorageError::IoError(e));
        }

        tracing::debug!("Saved blob at {:?}", full_path);
        Ok(())
    }

    /// Opens a file on the local filesystem for streaming
    async fn open(&self, key: &str) -> Result<BlobReader, StorageError> {
        let full_path = self.get_full_path(key)?;

        match fs::File::open(&full_path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    /// Deletes a file from local filesystem
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let full_path = self.get_full_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }
}
