mod app;
mod config_commands;
mod mailer_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Parser, Subcommand},
    herald_common::MailerId,
    herald_config::HeraldConfig,
    herald_metrics::{MetricsHandle, MetricsRecorderConfig, init_metrics},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::{config_commands::ConfigAction, mailer_commands::SendArgs};

#[derive(Parser)]
#[command(name = "herald", about = "herald: broadcast mailer for Telegram bots", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./herald.toml and ~/.config/herald/).
    #[arg(long, global = true, env = "HERALD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore stored mailers, start the ones marked run-on-startup and keep
    /// delivering until Ctrl-C.
    Run,
    /// List stored mailers with their delivery counts.
    List,
    /// Broadcast a text message and wait for it to finish.
    Send(SendArgs),
    /// Delete a stored mailer.
    Delete { id: MailerId },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the config and install the metrics recorder it asks for.
fn setup(path: Option<&Path>) -> anyhow::Result<(HeraldConfig, MetricsHandle)> {
    let config = herald_config::load(path)?;
    let mut global_labels: Vec<(String, String)> = config
        .metrics
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    global_labels.sort();
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled && config.metrics.prometheus,
        global_labels,
    })?;
    Ok((config, metrics))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "herald starting");

    let path = cli.config.as_deref();
    match cli.command {
        Commands::Run => {
            let (config, metrics) = setup(path)?;
            mailer_commands::run(&config, &metrics).await
        },
        Commands::List => {
            let (config, _) = setup(path)?;
            mailer_commands::list(&config).await
        },
        Commands::Send(args) => {
            let (config, metrics) = setup(path)?;
            mailer_commands::send(&config, &metrics, args).await
        },
        Commands::Delete { id } => {
            let (config, _) = setup(path)?;
            mailer_commands::delete(&config, id).await
        },
        Commands::Config { action } => config_commands::handle_config(action, path),
    }
}
