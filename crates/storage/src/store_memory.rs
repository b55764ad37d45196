//! In-memory store for testing.

use std::{collections::HashMap, sync::Mutex};

use {async_trait::async_trait, herald_common::MailerId};

use crate::{Error, Result, record::StorageRecord, store::MailerStore};

/// In-memory store backed by `HashMap`. Nothing survives the process.
pub struct InMemoryStore {
    records: Mutex<HashMap<MailerId, StorageRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailerStore for InMemoryStore {
    async fn list_ids(&self) -> Result<Vec<MailerId>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<MailerId> = records.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_record(&self, id: MailerId) -> Result<StorageRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::record_not_found(id))
    }

    async fn set_record(&self, id: MailerId, record: &StorageRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(id, record.clone());
        Ok(())
    }

    async fn delete_record(&self, id: MailerId) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.remove(&id).is_none() {
            return Err(Error::record_not_found(id));
        }
        Ok(())
    }
}
