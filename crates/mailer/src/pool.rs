//! Registry of live mailers and the collaborators they share.

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, RwLock},
};

use {
    futures::future::join_all,
    herald_common::{ChatSet, Context, MailerId, MailerSettings, RecipientId},
    herald_storage::{MailerStore, StorageRecord},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, gauge, pool as pool_metrics};

use crate::{
    Error, Result,
    content::{Content, ContentDecoder, ContentResolver},
    events::EventHub,
    mailer::{Mailer, MailerParts, MailerStatus, Registry, RunOutcome, Shared},
    placeholder::PlaceholderRenderer,
    transport::Transport,
};

/// Source of candidate ids for new mailers.
pub type IdGenerator = Arc<dyn Fn() -> MailerId + Send + Sync>;

/// Generated ids tried before giving up.
const ID_ATTEMPTS: usize = 16;

fn random_id() -> MailerId {
    MailerId(i64::from(rand::random::<u32>()))
}

pub struct MailerPoolBuilder {
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn MailerStore>>,
    hub: Option<EventHub>,
    renderer: Option<Arc<dyn PlaceholderRenderer>>,
    bot_id: i64,
    id_generator: Option<IdGenerator>,
    content_decoder: Option<ContentDecoder>,
}

impl MailerPoolBuilder {
    /// Persist mailers to `store`.
    pub fn store(mut self, store: Arc<dyn MailerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Emit lifecycle events through `hub`. The hub is frozen on build.
    pub fn hub(mut self, hub: EventHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn PlaceholderRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Bot identity stored with every record created by this pool.
    pub fn bot_id(mut self, bot_id: i64) -> Self {
        self.bot_id = bot_id;
        self
    }

    pub fn id_generator(mut self, generator: impl Fn() -> MailerId + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// How stored content descriptions are turned back into resolvers.
    /// Defaults to [`Content::decode`].
    pub fn content_decoder(mut self, decoder: ContentDecoder) -> Self {
        self.content_decoder = Some(decoder);
        self
    }

    pub fn build(self) -> MailerPool {
        if let Some(hub) = &self.hub {
            hub.freeze();
        }
        let registry: Arc<Registry> = Arc::new(RwLock::new(HashMap::new()));
        let shared = Arc::new(Shared {
            transport: self.transport,
            store: self.store,
            hub: self.hub,
            renderer: self.renderer,
            registry: Arc::downgrade(&registry),
        });
        MailerPool {
            registry,
            shared,
            bot_id: self.bot_id,
            id_generator: self.id_generator.unwrap_or_else(|| Arc::new(random_id)),
            content_decoder: self
                .content_decoder
                .unwrap_or_else(|| Arc::new(Content::decode)),
        }
    }
}

/// Owns every live mailer of one bot.
pub struct MailerPool {
    registry: Arc<Registry>,
    shared: Arc<Shared>,
    bot_id: i64,
    id_generator: IdGenerator,
    content_decoder: ContentDecoder,
}

impl MailerPool {
    pub fn builder(transport: Arc<dyn Transport>) -> MailerPoolBuilder {
        MailerPoolBuilder {
            transport,
            store: None,
            hub: None,
            renderer: None,
            bot_id: 0,
            id_generator: None,
            content_decoder: None,
        }
    }

    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }

    pub fn hub(&self) -> Option<&EventHub> {
        self.shared.hub.as_ref()
    }

    pub fn get(&self, id: MailerId) -> Option<Mailer> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Every registered mailer, ordered by id.
    pub fn get_all(&self) -> Vec<Mailer> {
        let mut mailers: Vec<Mailer> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        mailers.sort_by_key(Mailer::id);
        mailers
    }

    pub fn len(&self) -> usize {
        self.registry.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, mailer: &Mailer) -> Result<()> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        if registry.contains_key(&mailer.id()) {
            return Err(Error::MailerExists { id: mailer.id() });
        }
        registry.insert(mailer.id(), mailer.clone());
        #[cfg(feature = "metrics")]
        gauge!(pool_metrics::MAILERS).set(registry.len() as f64);
        Ok(())
    }

    /// Whether `id` is used by a registered mailer or a stored record.
    async fn is_taken(&self, id: MailerId) -> Result<bool> {
        if self.get(id).is_some() {
            return Ok(true);
        }
        let Some(store) = &self.shared.store else {
            return Ok(false);
        };
        match store.get_record(id).await {
            Ok(_) => Ok(true),
            Err(herald_storage::Error::RecordNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn allocate_id(&self) -> Result<MailerId> {
        for _ in 0..ID_ATTEMPTS {
            let id = (self.id_generator)();
            if !self.is_taken(id).await? {
                return Ok(id);
            }
            debug!(mailer_id = %id, "generated mailer id already in use");
        }
        Err(Error::IdGenerationExhausted {
            attempts: ID_ATTEMPTS,
        })
    }

    /// Create, register and (when `settings.preserve` and a store is
    /// configured) persist a new stopped mailer.
    pub async fn create(
        &self,
        content: Arc<dyn ContentResolver>,
        recipients: impl IntoIterator<Item = RecipientId>,
        settings: MailerSettings,
        context: Context,
        id: Option<MailerId>,
    ) -> Result<Mailer> {
        settings.interval.validate()?;

        let id = match id {
            Some(id) => {
                if self.is_taken(id).await? {
                    return Err(Error::MailerExists { id });
                }
                id
            },
            None => self.allocate_id().await?,
        };

        let chats = ChatSet::from_recipients(recipients);
        let record = match &self.shared.store {
            Some(_) if settings.preserve => Some(StorageRecord {
                chats: chats.clone(),
                content: content.to_value()?,
                settings: settings.clone(),
                bot_id: self.bot_id,
                context: context.clone(),
            }),
            _ => None,
        };

        let recipients = chats.len();
        let mailer = Mailer::new(
            MailerParts {
                id,
                bot_id: self.bot_id,
                content,
                chats,
                settings,
                context,
                status: MailerStatus::Stopped,
                stored: false,
            },
            Arc::clone(&self.shared),
        );
        self.register(&mailer)?;

        if let (Some(record), Some(store)) = (record, &self.shared.store) {
            if let Err(e) = store.set_record(id, &record).await {
                mailer.unregister();
                return Err(e.into());
            }
            mailer.mark_stored();
        }

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::CREATED_TOTAL).increment(1);

        info!(mailer_id = %id, recipients, persisted = mailer.is_stored(), "mailer created");
        Ok(mailer)
    }

    /// Unregister a mailer and delete its record. A running mailer is
    /// stopped first.
    pub async fn delete(&self, id: MailerId) -> Result<()> {
        let mailer = self.get(id);
        if mailer.is_none() && !self.is_taken(id).await? {
            return Err(Error::MailerNotFound { id });
        }

        if let Some(mailer) = &mailer {
            if mailer.status() == MailerStatus::Started
                && let Err(e) = mailer.stop().await
            {
                debug!(mailer_id = %id, error = %e, "stop before delete failed");
            }
            mailer.unregister();
            mailer.mark_unstored();
        }

        if let Some(store) = &self.shared.store {
            match store.delete_record(id).await {
                Ok(()) | Err(herald_storage::Error::RecordNotFound { .. }) => {},
                Err(e) => return Err(e.into()),
            }
        }

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::REMOVED_TOTAL).increment(1);

        info!(mailer_id = %id, "mailer deleted");
        Ok(())
    }

    async fn restore_one(&self, store: &dyn MailerStore, id: MailerId) -> Result<Mailer> {
        let record = store.get_record(id).await?;
        let content = (self.content_decoder)(record.content)?;
        record.settings.interval.validate()?;

        let status = if record.chats.has_pending() {
            MailerStatus::Stopped
        } else {
            MailerStatus::Completed
        };
        let mailer = Mailer::new(
            MailerParts {
                id,
                bot_id: record.bot_id,
                content,
                chats: record.chats,
                settings: record.settings,
                context: record.context,
                status,
                stored: true,
            },
            Arc::clone(&self.shared),
        );
        self.register(&mailer)?;
        Ok(mailer)
    }

    /// Rebuild a mailer for every stored record not registered yet.
    ///
    /// Records that cannot be read or decoded are logged and skipped.
    pub async fn restore_all(&self) -> Result<Vec<Mailer>> {
        let Some(store) = self.shared.store.clone() else {
            return Ok(Vec::new());
        };

        let mut restored = Vec::new();
        for id in store.list_ids().await? {
            if self.get(id).is_some() {
                continue;
            }
            match self.restore_one(store.as_ref(), id).await {
                Ok(mailer) => {
                    debug!(mailer_id = %id, status = %mailer.status(), "mailer restored");
                    restored.push(mailer);
                },
                Err(e) => warn!(mailer_id = %id, error = %e, "failed to restore mailer"),
            }
        }

        #[cfg(feature = "metrics")]
        counter!(pool_metrics::RESTORED_TOTAL).increment(restored.len() as u64);

        info!(count = restored.len(), "restored mailers");
        Ok(restored)
    }

    /// Restore stored mailers and start those flagged `run_on_startup`.
    pub async fn run_startup(&self) -> Result<Vec<Mailer>> {
        let restored = self.restore_all().await?;
        for mailer in &restored {
            if !mailer.settings().run_on_startup || mailer.status() != MailerStatus::Stopped {
                continue;
            }
            match mailer.start().await {
                Ok(()) => info!(mailer_id = %mailer.id(), "mailer resumed on startup"),
                Err(e) => warn!(mailer_id = %mailer.id(), error = %e, "failed to resume mailer"),
            }
        }
        Ok(restored)
    }

    async fn fan_out<T, F, Fut>(&self, f: F) -> BTreeMap<MailerId, Result<T>>
    where
        F: Fn(Mailer) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let calls = self.get_all().into_iter().map(|mailer| {
            let id = mailer.id();
            let call = f(mailer);
            async move { (id, call.await) }
        });
        join_all(calls).await.into_iter().collect()
    }

    /// Start every mailer. Individual failures are logged and returned.
    pub async fn start_all(&self) -> BTreeMap<MailerId, Result<()>> {
        let results = self
            .fan_out(|mailer| async move { mailer.start().await })
            .await;
        for (id, result) in &results {
            if let Err(e) = result {
                warn!(mailer_id = %id, error = %e, "failed to start mailer");
            }
        }
        results
    }

    pub async fn stop_all(&self) -> BTreeMap<MailerId, Result<()>> {
        self.fan_out(|mailer| async move { mailer.stop().await })
            .await
    }

    pub async fn wait_all(&self) -> BTreeMap<MailerId, Result<RunOutcome>> {
        self.fan_out(|mailer| async move { mailer.wait().await })
            .await
    }

    pub async fn destroy_all(&self) -> BTreeMap<MailerId, Result<()>> {
        self.fan_out(|mailer| async move { mailer.destroy().await })
            .await
    }

    pub async fn add_recipients_all(
        &self,
        recipients: &[RecipientId],
    ) -> BTreeMap<MailerId, Result<bool>> {
        self.fan_out(|mailer| {
            let recipients = recipients.to_vec();
            async move { mailer.add_recipients(recipients).await }
        })
        .await
    }
}
