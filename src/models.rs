use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Metadata of an uploaded file. Written once at upload, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct File {
    pub id: Uuid,
    /// Display name supplied by the sender. Never used to build a storage path.
    pub original_name: String,
    /// Server-generated blob key.
    pub stored_name: String,
    pub mime_type: String,
    pub size: i64,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Lifecycle record binding a code to a file.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: Uuid,
    pub file_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub downloads: i32,
    pub max_downloads: i32,
    pub is_active: bool,
}

impl Transfer {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Redeemable iff active and not past its expiry.
    pub fn is_redeemable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired_at(now)
    }
}

/// A transfer joined with the file it hands out.
#[derive(Debug, Clone)]
pub struct TransferWithFile {
    pub transfer: Transfer,
    pub file: File,
}

/// Flat row shape of the `transfers JOIN files` query.
#[derive(Debug, FromRow)]
pub struct TransferFileRow {
    pub transfer_id: Uuid,
    pub file_id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub downloads: i32,
    pub max_downloads: i32,
    pub is_active: bool,
    pub original_name: String,
    pub stored_name: String,
    pub mime_type: String,
    pub size: i64,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<TransferFileRow> for TransferWithFile {
    fn from(row: TransferFileRow) -> Self {
        TransferWithFile {
            transfer: Transfer {
                id: row.transfer_id,
                file_id: row.file_id,
                code: row.code,
                created_at: row.created_at,
                expires_at: row.expires_at,
                downloads: row.downloads,
                max_downloads: row.max_downloads,
                is_active: row.is_active,
            },
            file: File {
                id: row.file_id,
                original_name: row.original_name,
                stored_name: row.stored_name,
                mime_type: row.mime_type,
                size: row.size,
                checksum: row.checksum,
                uploaded_at: row.uploaded_at,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub transfer_code: String,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: i32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInfoResponse {
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub expires_at: DateTime<Utc>,
    pub downloads: i32,
    pub max_downloads: i32,
}

impl From<TransferWithFile> for TransferInfoResponse {
    fn from(found: TransferWithFile) -> Self {
        TransferInfoResponse {
            original_name: found.file.original_name,
            mime_type: found.file.mime_type,
            size: found.file.size,
            expires_at: found.transfer.expires_at,
            downloads: found.transfer.downloads,
            max_downloads: found.transfer.max_downloads,
        }
    }
}
