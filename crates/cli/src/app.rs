//! Wiring: store, transport and pool built from the loaded config.

use std::sync::Arc;

use {
    anyhow::{Context as _, Result, bail},
    herald_config::{HeraldConfig, StorageBackend, StorageConfig},
    herald_mailer::{EventHub, MailerEvent, MailerPool, PlaceholderRegistry},
    herald_storage::{MailerStore, store_file::FileStore, store_sqlite::SqliteStore},
    herald_telegram::TelegramTransport,
    tracing::{debug, info, warn},
};

/// Open the configured store. The memory backend has nothing to open:
/// mailers live only as long as the process.
pub async fn open_store(config: &StorageConfig) -> Result<Option<Arc<dyn MailerStore>>> {
    match config.backend {
        StorageBackend::Memory => Ok(None),
        StorageBackend::File => {
            let store = match &config.path {
                Some(dir) => FileStore::new(dir),
                None => FileStore::default_path()?,
            };
            debug!(dir = %store.dir().display(), "using file store");
            Ok(Some(Arc::new(store)))
        },
        StorageBackend::Sqlite => {
            let Some(url) = config.database_url.as_deref().filter(|u| !u.is_empty()) else {
                bail!("storage.database_url is required for the sqlite backend");
            };
            let store = SqliteStore::new(url)
                .await
                .with_context(|| format!("failed to open {url}"))?;
            debug!("using sqlite store");
            Ok(Some(Arc::new(store)))
        },
    }
}

pub fn transport(config: &HeraldConfig) -> Result<TelegramTransport> {
    let Some(token) = &config.telegram.token else {
        bail!("no bot token configured (set telegram.token or HERALD_TELEGRAM_TOKEN)");
    };
    let transport = TelegramTransport::new(token);
    match &config.telegram.api_url {
        Some(url) => {
            let url = url
                .parse::<reqwest::Url>()
                .with_context(|| format!("invalid telegram.api_url {url}"))?;
            Ok(transport.with_api_url(url))
        },
        None => Ok(transport),
    }
}

/// Root hub: logs per-recipient outcomes.
pub fn event_hub() -> Result<EventHub> {
    let hub = EventHub::new("herald");
    hub.on(MailerEvent::SuccessSent, |_, ctx| async move {
        debug!(
            mailer_id = %ctx.get("mailer_id").unwrap_or(&serde_json::Value::Null),
            chat_id = %ctx.get("chat_id").unwrap_or(&serde_json::Value::Null),
            "delivered"
        );
        Ok(Default::default())
    })?;
    hub.on(MailerEvent::FailedSent, |_, ctx| async move {
        warn!(
            mailer_id = %ctx.get("mailer_id").unwrap_or(&serde_json::Value::Null),
            chat_id = %ctx.get("chat_id").unwrap_or(&serde_json::Value::Null),
            error = %ctx.get("error").unwrap_or(&serde_json::Value::Null),
            "delivery failed"
        );
        Ok(Default::default())
    })?;
    for event in [
        MailerEvent::Started,
        MailerEvent::Stopped,
        MailerEvent::Completed,
    ] {
        hub.on(event, |event, ctx| async move {
            info!(
                mailer_id = %ctx.get("mailer_id").unwrap_or(&serde_json::Value::Null),
                %event,
                "mailer lifecycle"
            );
            Ok(Default::default())
        })?;
    }
    Ok(hub)
}

/// Build the pool: bot id from `getMe`, configured store, logging hub.
pub async fn build_pool(
    config: &HeraldConfig,
    placeholders: PlaceholderRegistry,
) -> Result<MailerPool> {
    let transport = transport(config)?;
    let bot_id = transport
        .bot_id()
        .await
        .context("failed to query the bot account")?;
    info!(bot_id, "connected to telegram");

    let mut builder = MailerPool::builder(Arc::new(transport))
        .bot_id(bot_id)
        .hub(event_hub()?)
        .renderer(Arc::new(placeholders));
    if let Some(store) = open_store(&config.storage).await? {
        builder = builder.store(store);
    }
    Ok(builder.build())
}
