//! Transfer lifecycle: code issuance, expiry, download accounting.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    code::{self, CodeGenerator},
    error::TransferError,
    models::{File, Transfer, TransferWithFile},
    storage::{BlobReader, Storage, StorageBackend},
    store::{StoreError, TransferStore},
    utils::{calculate_sha256, display_name},
};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub ttl: Duration,
    pub max_downloads: i32,
    pub max_file_size: u64,
}

/// File content and client-supplied metadata of an upload.
#[derive(Debug)]
pub struct NewUpload {
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub content: Bytes,
}

/// What the sender gets back.
#[derive(Debug, Clone)]
pub struct IssuedTransfer {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: i32,
}

/// A counted download, ready to stream.
pub struct Redemption {
    pub file: File,
    pub transfer: Transfer,
    pub content: BlobReader,
}

#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn TransferStore>,
    storage: StorageBackend,
    codes: CodeGenerator,
    settings: TransferSettings,
}

impl TransferService {
    pub fn new(
        store: Arc<dyn TransferStore>,
        storage: StorageBackend,
        codes: CodeGenerator,
        settings: TransferSettings,
    ) -> Self {
        Self { store, storage, codes, settings }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Store the blob, then publish the file and transfer records together.
    /// On any failure after the blob is written, the blob is removed again.
    pub async fn upload(&self, upload: NewUpload) -> Result<IssuedTransfer, TransferError> {
        let size = upload.content.len() as u64;
        if size > self.settings.max_file_size {
            return Err(TransferError::PayloadTooLarge {
                size,
                limit: self.settings.max_file_size,
            });
        }

        let file_id = Uuid::new_v4();
        let stored_name = format!("files/{}", Uuid::new_v4());
        let checksum = calculate_sha256(&upload.content);

        self.storage
            .upload(&stored_name, upload.content)
            .await
            .map_err(|e| {
                error!("Error storing blob {}: {}", stored_name, e);
                TransferError::UploadFailed(e.to_string())
            })?;

        let now = Utc::now();
        let file = File {
            id: file_id,
            original_name: display_name(upload.original_name.as_deref()),
            stored_name,
            mime_type: upload
                .mime_type
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size: size as i64,
            checksum,
            uploaded_at: now,
        };

        match self.publish(&file, now).await {
            Ok(transfer) => {
                info!(
                    "File uploaded. Code: {}, Size: {} bytes, Expires: {}",
                    transfer.code, file.size, transfer.expires_at
                );
                Ok(IssuedTransfer {
                    code: transfer.code,
                    expires_at: transfer.expires_at,
                    max_downloads: transfer.max_downloads,
                })
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&file.stored_name).await {
                    error!("Failed to remove blob {} after failed upload: {}", file.stored_name, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Allocate a free code and insert the records, retrying on code collisions.
    async fn publish(&self, file: &File, now: DateTime<Utc>) -> Result<Transfer, TransferError> {
        for _ in 0..self.codes.max_attempts {
            let code = self.codes.generate();
            if self.store.code_in_use(&code, now).await.map_err(upload_failed)? {
                continue;
            }

            let transfer = Transfer {
                id: Uuid::new_v4(),
                file_id: file.id,
                code,
                created_at: now,
                expires_at: now + self.settings.ttl,
                downloads: 0,
                max_downloads: self.settings.max_downloads,
                is_active: true,
            };

            match self.store.create(file, &transfer).await {
                Ok(()) => return Ok(transfer),
                // Lost a race for the code between the check and the insert
                Err(StoreError::CodeConflict) => continue,
                Err(e) => return Err(upload_failed(e)),
            }
        }

        Err(TransferError::CodeSpaceExhausted(self.codes.max_attempts))
    }

    /// Look up a redeemable transfer without counting a download.
    pub async fn info(&self, code: &str) -> Result<TransferWithFile, TransferError> {
        self.find_redeemable(code, Utc::now()).await
    }

    /// Count a download and open the blob for streaming.
    ///
    /// The increment is committed before the blob is opened and is not rolled back if
    /// streaming fails later: an attempt that got this far counts against the quota.
    pub async fn redeem(&self, code: &str) -> Result<Redemption, TransferError> {
        let found = self.find_redeemable(code, Utc::now()).await?;

        let transfer = self
            .store
            .record_download(found.transfer.id)
            .await?
            // A concurrent redemption used up the quota after our lookup
            .ok_or(TransferError::NotFoundOrExpired)?;

        info!(
            "Downloading {} (code {}, download {}/{})",
            found.file.id, transfer.code, transfer.downloads, transfer.max_downloads
        );

        let content = self.storage.open(&found.file.stored_name).await.map_err(|e| {
            error!("Error opening blob {}: {}", found.file.stored_name, e);
            TransferError::Storage(e)
        })?;

        Ok(Redemption {
            file: found.file,
            transfer,
            content,
        })
    }

    /// Deactivate the transfer holding `code` ahead of its expiry.
    /// A code past its expiry answers like redemption does.
    pub async fn revoke(&self, code: &str) -> Result<(), TransferError> {
        self.find_redeemable(code, Utc::now()).await?;
        if !self.store.revoke(code).await? {
            return Err(TransferError::NotFoundOrExpired);
        }
        info!("Transfer {} revoked", code);
        Ok(())
    }

    /// Delete records that expired before `cutoff` and then their blobs.
    /// Returns the number of transfers removed.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Result<usize, TransferError> {
        let stored_names = self.store.reap_expired(cutoff).await?;
        for stored_name in &stored_names {
            if let Err(e) = self.storage.delete(stored_name).await {
                warn!("Failed to delete expired blob {}: {}", stored_name, e);
            }
        }
        Ok(stored_names.len())
    }

    pub async fn ping(&self) -> Result<(), TransferError> {
        Ok(self.store.ping().await?)
    }

    async fn find_redeemable(&self, code: &str, now: DateTime<Utc>) -> Result<TransferWithFile, TransferError> {
        if !code::is_well_formed(code) {
            return Err(TransferError::NotFoundOrExpired);
        }

        let found = self
            .store
            .find_active(code)
            .await?
            .ok_or(TransferError::NotFoundOrExpired)?;

        // Only active transfers come back, so anything unredeemable is past its expiry
        if !found.transfer.is_redeemable_at(now) {
            // Stored state may lag behind the clock; settle it now
            if let Err(e) = self.store.deactivate(found.transfer.id).await {
                warn!("Failed to deactivate expired transfer {}: {}", found.transfer.id, e);
            }
            return Err(TransferError::LinkExpired);
        }

        Ok(found)
    }
}

fn upload_failed(err: StoreError) -> TransferError {
    TransferError::UploadFailed(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::LocalStorage, store::MemoryTransferStore};
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    async fn service_with(store: Arc<dyn TransferStore>, settings: TransferSettings) -> (TransferService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageBackend::Local(LocalStorage::new(dir.path()).await.unwrap());
        (TransferService::new(store, storage, CodeGenerator::default(), settings), dir)
    }

    fn settings(max_downloads: i32) -> TransferSettings {
        TransferSettings {
            ttl: Duration::minutes(10),
            max_downloads,
            max_file_size: 1024,
        }
    }

    fn upload(name: &str, content: &'static [u8]) -> NewUpload {
        NewUpload {
            original_name: Some(name.to_string()),
            mime_type: Some("application/pdf".to_string()),
            content: Bytes::from_static(content),
        }
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    fn blob_count(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path().join("files")).unwrap().count()
    }

    #[tokio::test]
    async fn quota_scenario_with_non_ascii_name() {
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(2)).await;
        let issued = service.upload(upload("résumé.pdf", b"0123456789")).await.unwrap();

        assert_eq!(issued.code.len(), 6);
        assert_eq!(issued.max_downloads, 2);

        for expected_downloads in 1..=2 {
            let redemption = service.redeem(&issued.code).await.unwrap();
            assert_eq!(redemption.file.original_name, "résumé.pdf");
            assert_eq!(redemption.transfer.downloads, expected_downloads);
            assert_eq!(read_all(redemption.content).await, b"0123456789");
        }

        assert!(matches!(
            service.redeem(&issued.code).await,
            Err(TransferError::NotFoundOrExpired)
        ));
    }

    #[tokio::test]
    async fn concurrent_redemptions_stop_at_quota() {
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(3)).await;
        let issued = service.upload(upload("a.bin", b"payload")).await.unwrap();

        let attempts = (0..20).map(|_| service.redeem(&issued.code));
        let results = futures::future::join_all(attempts).await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(TransferError::NotFoundOrExpired)))
            .count();
        assert_eq!(succeeded, 3);
        assert_eq!(refused, 17);
    }

    #[tokio::test]
    async fn expired_code_is_gone_then_not_found() {
        let settings = TransferSettings { ttl: Duration::milliseconds(-1), ..settings(5) };
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings).await;
        let issued = service.upload(upload("late.txt", b"late")).await.unwrap();

        assert!(matches!(service.redeem(&issued.code).await, Err(TransferError::LinkExpired)));
        assert!(matches!(service.info(&issued.code).await, Err(TransferError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn unknown_and_malformed_codes_are_not_found() {
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(1)).await;
        for code in ["123456", "12345", "abcdef", "../../x"] {
            assert!(matches!(service.redeem(code).await, Err(TransferError::NotFoundOrExpired)));
        }
    }

    #[tokio::test]
    async fn oversized_upload_stores_nothing() {
        let (service, dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(1)).await;
        let big = NewUpload {
            original_name: Some("big.bin".into()),
            mime_type: None,
            content: Bytes::from(vec![0u8; 1025]),
        };

        assert!(matches!(
            service.upload(big).await,
            Err(TransferError::PayloadTooLarge { size: 1025, limit: 1024 })
        ));
        assert_eq!(blob_count(&dir), 0);
    }

    #[tokio::test]
    async fn info_does_not_consume_quota() {
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(1)).await;
        let issued = service.upload(upload("doc.pdf", b"doc")).await.unwrap();

        for _ in 0..3 {
            let found = service.info(&issued.code).await.unwrap();
            assert_eq!(found.transfer.downloads, 0);
            assert_eq!(found.file.mime_type, "application/pdf");
        }
        assert!(service.redeem(&issued.code).await.is_ok());
    }

    #[tokio::test]
    async fn revoked_code_is_not_found() {
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(5)).await;
        let issued = service.upload(upload("x.txt", b"x")).await.unwrap();

        service.revoke(&issued.code).await.unwrap();
        assert!(matches!(service.redeem(&issued.code).await, Err(TransferError::NotFoundOrExpired)));
        assert!(matches!(service.revoke(&issued.code).await, Err(TransferError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn revoking_an_expired_code_reports_expiry() {
        let settings = TransferSettings { ttl: Duration::milliseconds(-1), ..settings(5) };
        let (service, _dir) = service_with(Arc::new(MemoryTransferStore::new()), settings).await;
        let issued = service.upload(upload("late.txt", b"late")).await.unwrap();

        assert!(matches!(service.revoke(&issued.code).await, Err(TransferError::LinkExpired)));
        assert!(matches!(service.revoke(&issued.code).await, Err(TransferError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn failed_blob_open_still_counts_the_download() {
        let (service, dir) = service_with(Arc::new(MemoryTransferStore::new()), settings(2)).await;
        let issued = service.upload(upload("gone.txt", b"gone")).await.unwrap();

        let found = service.info(&issued.code).await.unwrap();
        std::fs::remove_file(dir.path().join(&found.file.stored_name)).unwrap();

        assert!(matches!(service.redeem(&issued.code).await, Err(TransferError::Storage(_))));
        assert_eq!(service.info(&issued.code).await.unwrap().transfer.downloads, 1);

        assert!(matches!(service.redeem(&issued.code).await, Err(TransferError::Storage(_))));
        assert!(matches!(service.redeem(&issued.code).await, Err(TransferError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn sweep_removes_expired_blobs() {
        let settings = TransferSettings { ttl: Duration::milliseconds(-1), ..settings(5) };
        let (service, dir) = service_with(Arc::new(MemoryTransferStore::new()), settings).await;
        service.upload(upload("old.txt", b"old")).await.unwrap();
        assert_eq!(blob_count(&dir), 1);

        assert_eq!(service.sweep(Utc::now()).await.unwrap(), 1);
        assert_eq!(blob_count(&dir), 0);
    }

    /// Store whose inserts always fail, to observe upload cleanup.
    struct BrokenStore;

    #[async_trait]
    impl TransferStore for BrokenStore {
        async fn code_in_use(&self, _code: &str, _now: DateTime<Utc>) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn create(&self, _file: &File, _transfer: &Transfer) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
        async fn find_active(&self, _code: &str) -> Result<Option<TransferWithFile>, StoreError> {
            Ok(None)
        }
        async fn record_download(&self, _id: Uuid) -> Result<Option<Transfer>, StoreError> {
            Ok(None)
        }
        async fn deactivate(&self, _id: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
        async fn revoke(&self, _code: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn reap_expired(&self, _cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn failed_insert_removes_written_blob() {
        let (service, dir) = service_with(Arc::new(BrokenStore), settings(1)).await;

        assert!(matches!(
            service.upload(upload("a.txt", b"abc")).await,
            Err(TransferError::UploadFailed(_))
        ));
        assert_eq!(blob_count(&dir), 0);
    }

    /// Store where every code is permanently taken.
    struct FullStore;

    #[async_trait]
    impl TransferStore for FullStore {
        async fn code_in_use(&self, _code: &str, _now: DateTime<Utc>) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn create(&self, _file: &File, _transfer: &Transfer) -> Result<(), StoreError> {
            Err(StoreError::CodeConflict)
        }
        async fn find_active(&self, _code: &str) -> Result<Option<TransferWithFile>, StoreError> {
            Ok(None)
        }
        async fn record_download(&self, _id: Uuid) -> Result<Option<Transfer>, StoreError> {
            Ok(None)
        }
        async fn deactivate(&self, _id: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
        async fn revoke(&self, _code: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn reap_expired(&self, _cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn exhausted_code_space_fails_upload_and_cleans_up() {
        let (service, dir) = service_with(Arc::new(FullStore), settings(1)).await;

        assert!(matches!(
            service.upload(upload("a.txt", b"abc")).await,
            Err(TransferError::CodeSpaceExhausted(5))
        ));
        assert_eq!(blob_count(&dir), 0);
    }
}
