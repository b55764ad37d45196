use std::sync::Arc;

use {
    anyhow::{Context as _, Result, bail},
    clap::{Args, ValueEnum},
    herald_common::{ChatState, Context, IntervalPolicy, MailerId, RecipientId},
    herald_config::HeraldConfig,
    herald_mailer::{Content, Error as MailerError, MailerStatus, ParseMode, PlaceholderRegistry},
    herald_metrics::MetricsHandle,
    herald_storage::StorageRecord,
    tracing::{debug, info, warn},
};

use crate::app::{build_pool, open_store};

#[derive(Clone, Copy, ValueEnum)]
pub enum ParseModeArg {
    Html,
    #[value(name = "markdownv2")]
    MarkdownV2,
    Markdown,
}

impl From<ParseModeArg> for ParseMode {
    fn from(arg: ParseModeArg) -> Self {
        match arg {
            ParseModeArg::Html => Self::Html,
            ParseModeArg::MarkdownV2 => Self::MarkdownV2,
            ParseModeArg::Markdown => Self::Markdown,
        }
    }
}

#[derive(Args)]
pub struct SendArgs {
    /// Message text. `$key` / `${key}` placeholders are filled from `--var`.
    #[arg(long)]
    text: String,
    /// Recipient chat ids, comma separated.
    #[arg(long, required = true, value_delimiter = ',', allow_hyphen_values = true)]
    to: Vec<i64>,
    #[arg(long, value_enum)]
    parse_mode: Option<ParseModeArg>,
    /// Send without a notification sound.
    #[arg(long)]
    silent: bool,
    /// Seconds between two sends (overrides the configured interval).
    #[arg(long)]
    interval: Option<f64>,
    /// Do not persist the broadcast.
    #[arg(long)]
    no_preserve: bool,
    /// Placeholder value, `key=value`. Repeatable.
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        },
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Restore stored mailers, start the startup ones and keep running until
/// Ctrl-C.
pub async fn run(config: &HeraldConfig, metrics: &MetricsHandle) -> Result<()> {
    let pool = build_pool(config, PlaceholderRegistry::new()).await?;
    let started = pool.run_startup().await?;
    info!(
        mailers = pool.len(),
        started = started.len(),
        "herald running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    for (id, result) in pool.stop_all().await {
        match result {
            Ok(()) => info!(mailer_id = %id, "mailer stopped"),
            Err(MailerError::AlreadyStopped { .. } | MailerError::AlreadyCompleted { .. }) => {},
            Err(e) => warn!(mailer_id = %id, error = %e, "failed to stop mailer"),
        }
    }
    debug!(metrics = %metrics.render(), "final metrics");
    Ok(())
}

/// Create a text broadcast and run it to completion.
pub async fn send(config: &HeraldConfig, metrics: &MetricsHandle, args: SendArgs) -> Result<()> {
    let mut settings = config.mailer.clone();
    if let Some(seconds) = args.interval {
        settings.interval = IntervalPolicy::fixed(seconds)?;
    }
    if args.no_preserve {
        settings.preserve = false;
    }

    let mut placeholders = PlaceholderRegistry::new();
    for (key, value) in args.vars {
        placeholders.add_static(key, value);
    }

    let pool = build_pool(config, placeholders).await?;
    let content = Content::Text {
        text: args.text,
        parse_mode: args.parse_mode.map(Into::into),
        disable_notification: args.silent,
    };
    let mailer = pool
        .create(
            Arc::new(content),
            args.to.into_iter().map(RecipientId),
            settings,
            Context::new(),
            None,
        )
        .await?;
    println!("created mailer {}", mailer.id());

    mailer.start().await?;
    let wait = mailer.wait();
    tokio::pin!(wait);
    let finished = tokio::select! {
        outcome = &mut wait => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome?,
        None => {
            eprintln!("interrupted, stopping mailer {}", mailer.id());
            let (stopped, outcome) = tokio::join!(mailer.stop(), &mut wait);
            if let Err(e) = stopped {
                warn!(mailer_id = %mailer.id(), error = %e, "stop failed");
            }
            outcome?
        },
    };

    let stats = mailer.statistics().await;
    println!(
        "{}: {} sent, {} failed, {} pending",
        outcome.label(),
        stats.success,
        stats.failed,
        stats.pending
    );
    debug!(metrics = %metrics.render(), "final metrics");
    Ok(())
}

/// Print stored mailers with their delivery counts.
pub async fn list(config: &HeraldConfig) -> Result<()> {
    let Some(store) = open_store(&config.storage).await? else {
        println!("memory backend: nothing is stored");
        return Ok(());
    };

    let ids = store.list_ids().await?;
    if ids.is_empty() {
        println!("no mailers");
        return Ok(());
    }

    println!(
        "{:>12}  {:<10}  {:>8}  {:>8}  {:>8}  {:>8}",
        "ID", "STATUS", "TOTAL", "PENDING", "SUCCESS", "FAILED"
    );
    for id in ids {
        match store.get_record(id).await {
            Ok(record) => println!("{}", format_row(id, &record)),
            Err(e) => warn!(mailer_id = %id, error = %e, "unreadable record"),
        }
    }
    Ok(())
}

fn format_row(id: MailerId, record: &StorageRecord) -> String {
    let chats = &record.chats;
    let status = if chats.has_pending() {
        MailerStatus::Stopped
    } else {
        MailerStatus::Completed
    };
    format!(
        "{:>12}  {:<10}  {:>8}  {:>8}  {:>8}  {:>8}",
        id.to_string(),
        status.to_string(),
        chats.len(),
        chats.count(ChatState::Pending),
        chats.count(ChatState::Success),
        chats.count(ChatState::Failed),
    )
}

/// Remove a stored mailer. A `herald run` process that already restored it
/// keeps it until restart.
pub async fn delete(config: &HeraldConfig, id: MailerId) -> Result<()> {
    let Some(store) = open_store(&config.storage).await? else {
        bail!("memory backend: nothing is stored");
    };
    store
        .delete_record(id)
        .await
        .with_context(|| format!("failed to delete mailer {id}"))?;
    println!("deleted mailer {id}");
    Ok(())
}
