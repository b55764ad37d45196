//! Test doubles shared by the unit tests of this crate.

use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    herald_common::{MailerId, RecipientId},
    herald_storage::{MailerStore, StorageRecord, store_memory::InMemoryStore},
    serde_json::{Value, json},
};

use crate::{
    content::OutboundCall,
    transport::{Transport, TransportError},
};

/// Transport answering from a script, then `{"ok": true}` once the script
/// runs out.
#[derive(Default)]
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Result<Value, TransportError>>>,
    calls: Mutex<Vec<OutboundCall>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, response: Result<Value, TransportError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<OutboundCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, call: &OutboundCall) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.clone());
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "ok": true })))
    }
}

/// In-memory store whose deletes fail while `fail_deletes` is set.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: InMemoryStore,
    fail_deletes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Release);
    }
}

#[async_trait]
impl MailerStore for FlakyStore {
    async fn list_ids(&self) -> herald_storage::Result<Vec<MailerId>> {
        self.inner.list_ids().await
    }

    async fn get_record(&self, id: MailerId) -> herald_storage::Result<StorageRecord> {
        self.inner.get_record(id).await
    }

    async fn set_record(&self, id: MailerId, record: &StorageRecord) -> herald_storage::Result<()> {
        self.inner.set_record(id, record).await
    }

    async fn delete_record(&self, id: MailerId) -> herald_storage::Result<()> {
        if self.fail_deletes.load(Ordering::Acquire) {
            return Err(herald_storage::Error::message("disk full"));
        }
        self.inner.delete_record(id).await
    }
}

pub(crate) fn recipients(ids: &[i64]) -> Vec<RecipientId> {
    ids.iter().copied().map(RecipientId).collect()
}

/// Poll `check` until it holds, panicking after roughly five seconds.
pub(crate) async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
