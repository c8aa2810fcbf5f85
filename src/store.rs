use crate::catalog::types::Work;
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const EXTERNAL_ID_PREFIX: &str = "RJ";

/// Persisted form of a catalog work. One row per `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DownloadRecord {
    pub external_id: String,
    pub source_id: i64,
    pub title: String,
}

impl DownloadRecord {
    pub fn from_work(work: &Work) -> Self {
        Self {
            external_id: format!("{}{}", EXTERNAL_ID_PREFIX, work.id),
            source_id: work.id,
            title: work.title.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn exists(&self, source_id: i64) -> Result<bool, StoreError>;

    /// Check and insert inside one transaction. A lookup failure comes back
    /// as `StoreError::Lookup`; an insert or commit failure as
    /// `StoreError::Insert` after the transaction is rolled back.
    async fn insert_if_absent(&self, record: &DownloadRecord) -> Result<InsertOutcome, StoreError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply migrations.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let connect_err = |source| StoreError::Connect { url: url.to_string(), source };

        let opts = SqliteConnectOptions::from_str(url)
            .map_err(connect_err)?
            .create_if_missing(true);

        // Every in-memory connection is its own database, so keep exactly one
        // and never recycle it.
        let pool_opts = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .map_err(connect_err)?;

        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloads")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(n.max(0) as u64)
    }

    pub async fn get(&self, source_id: i64) -> Result<Option<DownloadRecord>, StoreError> {
        sqlx::query_as::<_, DownloadRecord>(
            "SELECT external_id, source_id, title FROM downloads WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn exists(&self, source_id: i64) -> Result<bool, StoreError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT id FROM downloads WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| StoreError::Lookup { source_id, source })?;
        Ok(row.is_some())
    }

    async fn insert_if_absent(&self, record: &DownloadRecord) -> Result<InsertOutcome, StoreError> {
        let source_id = record.source_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| StoreError::Lookup { source_id, source })?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM downloads WHERE source_id = ?")
                .bind(source_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|source| StoreError::Lookup { source_id, source })?;

        if existing.is_some() {
            let _ = tx.rollback().await;
            return Ok(InsertOutcome::AlreadyPresent);
        }

        let inserted = sqlx::query(
            "INSERT INTO downloads(external_id, source_id, title, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.external_id)
        .bind(source_id)
        .bind(&record.title)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(source) = inserted {
            let _ = tx.rollback().await;
            return Err(StoreError::Insert { source_id, source });
        }

        tx.commit()
            .await
            .map_err(|source| StoreError::Insert { source_id, source })?;
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(id: i64, title: &str) -> Work {
        Work { id, title: title.to_string() }
    }

    #[test]
    fn test_record_from_work() {
        let record = DownloadRecord::from_work(&work(403038, "  Foo bar \n"));
        assert_eq!(record.external_id, "RJ403038");
        assert_eq!(record.source_id, 403038);
        assert_eq!(record.title, "Foo bar");
    }

    #[tokio::test]
    async fn test_insert_then_skip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = DownloadRecord::from_work(&work(1, " Foo "));

        assert!(!store.exists(1).await.unwrap());
        assert_eq!(store.insert_if_absent(&record).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_if_absent(&record).await.unwrap(), InsertOutcome::AlreadyPresent);
        assert!(store.exists(1).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);

        let stored = store.get(1).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_in_memory_connection_never_recycled() {
        let store = SqliteStore::in_memory().await.unwrap();
        let opts = store.pool.options();
        assert_eq!(opts.get_max_connections(), 1);
        assert_eq!(opts.get_min_connections(), 1);
        assert!(opts.get_idle_timeout().is_none());
        assert!(opts.get_max_lifetime().is_none());
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_and_store_keeps_working() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_if_absent(&DownloadRecord::from_work(&work(1, "one"))).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_thirteen BEFORE INSERT ON downloads \
             WHEN NEW.source_id = 13 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store
            .insert_if_absent(&DownloadRecord::from_work(&work(13, "thirteen")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Insert { source_id: 13, .. }));
        assert!(!err.is_fatal());
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!store.exists(13).await.unwrap());

        let next = store.insert_if_absent(&DownloadRecord::from_work(&work(2, "two"))).await.unwrap();
        assert_eq!(next, InsertOutcome::Inserted);
        assert_eq!(store.count().await.unwrap(), 2);

        sqlx::query("DROP TRIGGER reject_thirteen").execute(&store.pool).await.unwrap();
        let retried = store
            .insert_if_absent(&DownloadRecord::from_work(&work(13, "thirteen")))
            .await
            .unwrap();
        assert_eq!(retried, InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn test_file_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());

        let store = SqliteStore::open(&url).await.unwrap();
        store.insert_if_absent(&DownloadRecord::from_work(&work(7, "Seven"))).await.unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&url).await.unwrap();
        assert!(reopened.exists(7).await.unwrap());
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
