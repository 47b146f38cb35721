use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{StoreError, TransferStore};
use crate::models::{File, Transfer, TransferWithFile};

/// In-process transfer store for single-node deployments without a database.
/// State is lost on restart. Every operation runs under one lock, which makes the
/// download increment trivially linearizable.
#[derive(Default)]
pub struct MemoryTransferStore {
    records: Mutex<HashMap<Uuid, TransferWithFile>>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let mut taken = false;
        for record in records.values_mut() {
            let transfer = &mut record.transfer;
            if transfer.code != code || !transfer.is_active {
                continue;
            }
            if transfer.expires_at < now {
                transfer.is_active = false;
            } else {
                taken = true;
            }
        }
        Ok(taken)
    }

    async fn create(&self, file: &File, transfer: &Transfer) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let conflict = records
            .values()
            .any(|r| r.transfer.is_active && r.transfer.code == transfer.code);
        if transfer.is_active && conflict {
            return Err(StoreError::CodeConflict);
        }
        records.insert(
            transfer.id,
            TransferWithFile {
                transfer: transfer.clone(),
                file: file.clone(),
            },
        );
        Ok(())
    }

    async fn find_active(&self, code: &str) -> Result<Option<TransferWithFile>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| r.transfer.is_active && r.transfer.code == code)
            .cloned())
    }

    async fn record_download(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError> {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(&transfer_id) else {
            return Ok(None);
        };
        let transfer = &mut record.transfer;
        if !transfer.is_active || transfer.downloads >= transfer.max_downloads {
            return Ok(None);
        }
        transfer.downloads += 1;
        transfer.is_active = transfer.downloads < transfer.max_downloads;
        Ok(Some(transfer.clone()))
    }

    async fn deactivate(&self, transfer_id: Uuid) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&transfer_id) {
            record.transfer.is_active = false;
        }
        Ok(())
    }

    async fn revoke(&self, code: &str) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let mut revoked = false;
        for record in records.values_mut() {
            if record.transfer.is_active && record.transfer.code == code {
                record.transfer.is_active = false;
                revoked = true;
            }
        }
        Ok(revoked)
    }

    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut records = self.records.lock().await;
        let mut stored_names = Vec::new();
        records.retain(|_, record| {
            let keep = record.transfer.expires_at >= cutoff;
            if !keep {
                stored_names.push(record.file.stored_name.clone());
            }
            keep
        });
        Ok(stored_names)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
