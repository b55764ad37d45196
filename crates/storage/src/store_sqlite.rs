//! SQLite-backed mailer store using sqlx.

use {
    async_trait::async_trait,
    herald_common::MailerId,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{Error, Result, error::Context, record::StorageRecord, store::MailerStore};

/// SQLite-backed persistence for mailer records.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other tables use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` opens a distinct database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailerStore for SqliteStore {
    async fn list_ids(&self) -> Result<Vec<MailerId>> {
        let rows = sqlx::query("SELECT id FROM mailers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| MailerId(row.get::<i64, _>("id")))
            .collect())
    }

    async fn get_record(&self, id: MailerId) -> Result<StorageRecord> {
        let row = sqlx::query("SELECT data FROM mailers WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::record_not_found(id))?;
        let data: String = row.get("data");
        Ok(serde_json::from_str(&data)?)
    }

    async fn set_record(&self, id: MailerId, record: &StorageRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO mailers (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data,
             updated_at = strftime('%s','now')",
        )
        .bind(id.0)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_record(&self, id: MailerId) -> Result<()> {
        let result = sqlx::query("DELETE FROM mailers WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::record_not_found(id));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        herald_common::{ChatSet, ChatState, RecipientId},
    };

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn make_record(recipients: &[i64]) -> StorageRecord {
        StorageRecord {
            chats: ChatSet::from_recipients(recipients.iter().copied().map(RecipientId)),
            content: serde_json::json!({ "type": "text", "text": "hi" }),
            settings: Default::default(),
            bot_id: 7,
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_roundtrip() {
        let store = make_store().await;
        store.set_record(MailerId(2), &make_record(&[1])).await.unwrap();
        store.set_record(MailerId(1), &make_record(&[1, 2])).await.unwrap();

        assert_eq!(
            store.list_ids().await.unwrap(),
            vec![MailerId(1), MailerId(2)]
        );
        assert_eq!(
            store.get_record(MailerId(1)).await.unwrap(),
            make_record(&[1, 2])
        );
    }

    #[tokio::test]
    async fn test_sqlite_upsert() {
        let store = make_store().await;
        store.set_record(MailerId(1), &make_record(&[1])).await.unwrap();

        let mut record = make_record(&[1]);
        record
            .chats
            .transition(RecipientId(1), ChatState::Pending, ChatState::Failed)
            .unwrap();
        store.set_record(MailerId(1), &record).await.unwrap();

        assert_eq!(store.list_ids().await.unwrap().len(), 1);
        let got = store.get_record(MailerId(1)).await.unwrap();
        assert_eq!(got.chats.state_of(RecipientId(1)), Some(ChatState::Failed));
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let store = make_store().await;
        store.set_record(MailerId(1), &make_record(&[1])).await.unwrap();
        store.delete_record(MailerId(1)).await.unwrap();
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_missing_record() {
        let store = make_store().await;
        assert!(matches!(
            store.get_record(MailerId(9)).await,
            Err(Error::RecordNotFound { .. })
        ));
        assert!(matches!(
            store.delete_record(MailerId(9)).await,
            Err(Error::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_file_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", tmp.path().join("herald.db").display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.set_record(MailerId(5), &make_record(&[3])).await.unwrap();
        }

        let reopened = SqliteStore::new(&url).await.unwrap();
        assert_eq!(reopened.list_ids().await.unwrap(), vec![MailerId(5)]);
    }
}
