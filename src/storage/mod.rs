// Submodules for local file system storage and S3 storage
mod local;
mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::info;

pub use crate::storage::{local::LocalStorage, s3::S3Storage};
use crate::config::Config;

/// Streaming handle to a stored blob. Dropping it releases the underlying file or connection.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Upload Error: {0}")]
    UploadError(String),

    #[error("Download Error: {0}")]
    DownloadError(String),

    #[error("Delete Error: {0}")]
    DeleteError(String),
}

/// Blob storage addressed by server-generated keys. Blobs are write-once, read-many.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `content` under `key`.
    async fn upload(&self, key: &str, content: Bytes) -> Result<(), StorageError>;

    /// Open a blob for streaming.
    async fn open(&self, key: &str) -> Result<BlobReader, StorageError>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

// Enum to represent storage backends
#[derive(Clone)]
pub enum StorageBackend {
    Local(LocalStorage),  // Local filesystem storage
    S3(S3Storage),        // AWS S3 or MinIO storage
}

// Delegates calls to the chosen backend
#[async_trait]
impl Storage for StorageBackend {
    async fn upload(&self, key: &str, content: Bytes) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(s) => s.upload(key, content).await,
            StorageBackend::S3(s) => s.upload(key, content).await,
        }
    }

    async fn open(&self, key: &str) -> Result<BlobReader, StorageError> {
        match self {
            StorageBackend::Local(s) => s.open(key).await,
            StorageBackend::S3(s) => s.open(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(s) => s.delete(key).await,
            StorageBackend::S3(s) => s.delete(key).await,
        }
    }
}

// Initialize the storage backend based on config
pub async fn init_storage(config: &Config) -> Result<StorageBackend, StorageError> {
    if config.use_s3 {
        info!("Initializing S3 storage");
        Ok(StorageBackend::S3(S3Storage::new(config).await))
    } else {
        info!("Initializing Local storage at {}", config.upload_dir);
        Ok(StorageBackend::Local(LocalStorage::new(&config.upload_dir).await?))
    }
}
