use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, TransferStore};
use crate::models::{File, Transfer, TransferFileRow, TransferWithFile};

const ACTIVE_CODE_INDEX: &str = "transfers_active_code_idx";

/// PostgreSQL-backed transfer store.
#[derive(Clone)]
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        // Lazy expiry: release the code from holders whose TTL has elapsed
        sqlx::query(
            "UPDATE transfers SET is_active = FALSE \
             WHERE code = $1 AND is_active AND expires_at < $2",
        )
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM transfers WHERE code = $1 AND is_active)",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    async fn create(&self, file: &File, transfer: &Transfer) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (id, original_name, stored_name, mime_type, size, checksum, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(file.id)
        .bind(&file.original_name)
        .bind(&file.stored_name)
        .bind(&file.mime_type)
        .bind(file.size)
        .bind(&file.checksum)
        .bind(file.uploaded_at)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transfers (id, file_id, code, created_at, expires_at, downloads, max_downloads, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.file_id)
        .bind(&transfer.code)
        .bind(transfer.created_at)
        .bind(transfer.expires_at)
        .bind(transfer.downloads)
        .bind(transfer.max_downloads)
        .bind(transfer.is_active)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ACTIVE_CODE_INDEX) => {
                // Dropping `tx` rolls back the file insert as well
                return Err(StoreError::CodeConflict);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_active(&self, code: &str) -> Result<Option<TransferWithFile>, StoreError> {
        let row = sqlx::query_as::<_, TransferFileRow>(
            r#"
            SELECT t.id AS transfer_id, t.file_id, t.code, t.created_at, t.expires_at,
                   t.downloads, t.max_downloads, t.is_active,
                   f.original_name, f.stored_name, f.mime_type, f.size, f.checksum, f.uploaded_at
            FROM transfers t
            JOIN files f ON t.file_id = f.id
            WHERE t.code = $1 AND t.is_active
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TransferWithFile::from))
    }

    async fn record_download(&self, transfer_id: Uuid) -> Result<Option<Transfer>, StoreError> {
        // Single conditional update; the row lock serializes concurrent redemptions and the
        // WHERE clause is re-checked against the committed row, so no increment is lost and
        // the quota can't be overrun.
        let updated = sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET downloads = downloads + 1,
                is_active = downloads + 1 < max_downloads
            WHERE id = $1 AND is_active AND downloads < max_downloads
            RETURNING id, file_id, code, created_at, expires_at, downloads, max_downloads, is_active
            "#,
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn deactivate(&self, transfer_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE transfers SET is_active = FALSE WHERE id = $1 AND is_active")
            .bind(transfer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn revoke(&self, code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE transfers SET is_active = FALSE WHERE code = $1 AND is_active")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        // Transfers go with their file via ON DELETE CASCADE
        let stored_names = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM files
            WHERE id IN (SELECT file_id FROM transfers WHERE expires_at < $1)
            RETURNING stored_name
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(stored_names)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Run against a scratch database: `DATABASE_URL=postgres://... cargo test -- --ignored`

    use super::*;
    use crate::database::init_db;
    use chrono::Duration;

    async fn store() -> PgTransferStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgTransferStore::new(init_db(&url, 5).await.expect("database"))
    }

    fn records(code: &str, max_downloads: i32, ttl: Duration) -> (File, Transfer) {
        let now = Utc::now();
        let file = File {
            id: Uuid::new_v4(),
            original_name: "résumé.pdf".into(),
            stored_name: format!("files/{}", Uuid::new_v4()),
            mime_type: "application/pdf".into(),
            size: 10,
            checksum: "00".into(),
            uploaded_at: now,
        };
        let transfer = Transfer {
            id: Uuid::new_v4(),
            file_id: file.id,
            code: code.into(),
            created_at: now,
            expires_at: now + ttl,
            downloads: 0,
            max_downloads,
            is_active: true,
        };
        (file, transfer)
    }

    fn random_code() -> String {
        crate::code::CodeGenerator::default().generate()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn concurrent_downloads_never_exceed_quota() {
        let store = store().await;
        let (file, transfer) = records(&random_code(), 3, Duration::minutes(10));
        store.create(&file, &transfer).await.unwrap();

        let attempts = (0..20).map(|_| store.record_download(transfer.id));
        let results = futures::future::join_all(attempts).await;
        let granted = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();

        assert_eq!(granted, 3);
        store.revoke(&transfer.code).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn duplicate_active_code_conflicts_and_rolls_back_file() {
        let store = store().await;
        let code = random_code();
        let (file_a, transfer_a) = records(&code, 1, Duration::minutes(10));
        let (file_b, transfer_b) = records(&code, 1, Duration::minutes(10));

        store.create(&file_a, &transfer_a).await.unwrap();
        assert!(matches!(
            store.create(&file_b, &transfer_b).await,
            Err(StoreError::CodeConflict)
        ));

        let orphan: Option<Uuid> = sqlx::query_scalar("SELECT id FROM files WHERE id = $1")
            .bind(file_b.id)
            .fetch_optional(&store.pool)
            .await
            .unwrap();
        assert!(orphan.is_none());
        store.revoke(&code).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn expired_holder_releases_its_code() {
        let store = store().await;
        let code = random_code();
        let (file, transfer) = records(&code, 1, Duration::seconds(-1));
        store.create(&file, &transfer).await.unwrap();

        assert!(!store.code_in_use(&code, Utc::now()).await.unwrap());
        assert!(store.find_active(&code).await.unwrap().is_none());

        let reaped = store.reap_expired(Utc::now()).await.unwrap();
        assert!(reaped.contains(&file.stored_name));
    }
}
