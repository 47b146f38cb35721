//! Durable records of files and transfers: the single source of truth for transfer lifecycle state.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryTransferStore;
pub use postgres::PgTransferStore;

use crate::models::{File, Transfer, TransferWithFile};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another active transfer already holds the code.
    #[error("Transfer code already in use")]
    CodeConflict,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Whether an active, unexpired transfer holds `code`. Active holders that are
    /// already past expiry are deactivated on the way, freeing the code.
    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Insert the file and its transfer as one unit: either both become visible or neither.
    /// Fails with [`StoreError::CodeConflict`] if an active transfer claimed the code first.
    async fn create(&self, file: &File, transfer: &Transfer) -> Result<(), StoreError>;

    /// The active transfer holding `code`, joined with its file.
    async fn find_active(&self, code: &str) -> Result<Option<TransferWithFile>, StoreError>;

    /// Count one download as a single atomic update: increments `downloads` and recomputes
    /// `is_active`. Returns `None` when the transfer is no longer active or its quota is
    /// already used up, i.e. a concurrent redemption got there first.
    async fn record_download(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError>;

    /// Flip `is_active` to false. No-op for transfers that are already inactive.
    async fn deactivate(&self, transfer_id: Uuid) -> Result<(), StoreError>;

    /// Manually deactivate the active transfer holding `code`. Returns whether one existed.
    async fn revoke(&self, code: &str) -> Result<bool, StoreError>;

    /// Delete every transfer (and its file record) that expired before `cutoff`.
    /// Returns the storage keys of the deleted files.
    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
