//! Persistence trait for mailer records.

use {async_trait::async_trait, herald_common::MailerId};

use crate::{Result, record::StorageRecord};

/// Persistence backend for mailers. Each call is atomic per record.
#[async_trait]
pub trait MailerStore: Send + Sync {
    async fn list_ids(&self) -> Result<Vec<MailerId>>;
    async fn get_record(&self, id: MailerId) -> Result<StorageRecord>;
    async fn set_record(&self, id: MailerId, record: &StorageRecord) -> Result<()>;
    async fn delete_record(&self, id: MailerId) -> Result<()>;
}

/// Read a record, hand it to `f` for mutation, and write it back.
///
/// The write happens whatever `f` returns, so a closure reporting an error
/// through its own return value still has its partial edits persisted.
pub async fn update_record<T, F>(store: &dyn MailerStore, id: MailerId, f: F) -> Result<T>
where
    F: FnOnce(&mut StorageRecord) -> T + Send,
{
    let mut record = store.get_record(id).await?;
    let out = f(&mut record);
    store.set_record(id, &record).await?;
    Ok(out)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store_memory::InMemoryStore,
        herald_common::{ChatSet, ChatState, RecipientId},
    };

    fn record() -> StorageRecord {
        StorageRecord {
            chats: ChatSet::from_recipients([RecipientId(1), RecipientId(2)]),
            content: serde_json::json!({ "type": "text", "text": "hello" }),
            settings: Default::default(),
            bot_id: 1,
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn update_writes_back_mutation() {
        let store = InMemoryStore::new();
        store.set_record(MailerId(1), &record()).await.unwrap();

        let moved = update_record(&store, MailerId(1), |rec| {
            rec.chats
                .transition(RecipientId(1), ChatState::Pending, ChatState::Success)
                .is_ok()
        })
        .await
        .unwrap();
        assert!(moved);

        let stored = store.get_record(MailerId(1)).await.unwrap();
        assert_eq!(stored.chats.state_of(RecipientId(1)), Some(ChatState::Success));
    }

    #[tokio::test]
    async fn update_writes_back_even_when_closure_reports_error() {
        let store = InMemoryStore::new();
        store.set_record(MailerId(1), &record()).await.unwrap();

        let out: std::result::Result<(), String> = update_record(&store, MailerId(1), |rec| {
            rec.bot_id = 42;
            Err("validation failed".to_string())
        })
        .await
        .unwrap();
        assert!(out.is_err());

        let stored = store.get_record(MailerId(1)).await.unwrap();
        assert_eq!(stored.bot_id, 42);
    }

    #[tokio::test]
    async fn update_missing_record_fails() {
        let store = InMemoryStore::new();
        let err = update_record(&store, MailerId(5), |_| ()).await.unwrap_err();
        assert!(matches!(err, crate::Error::RecordNotFound { .. }));
    }
}
