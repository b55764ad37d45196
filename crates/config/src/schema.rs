//! Config schema.

use std::{collections::HashMap, path::PathBuf};

use {
    herald_common::MailerSettings,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Defaults applied to mailers created from the command line.
    pub mailer: MailerSettings,
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    pub metrics: MetricsConfig,
}

/// Where mailer records are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Nothing survives a restart.
    Memory,
    /// One JSON file per mailer.
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend. Defaults to the user data directory.
    pub path: Option<PathBuf>,
    /// sqlx connection string for the sqlite backend, e.g.
    /// `sqlite:/var/lib/herald/mailers.db?mode=rwc`.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Bot API base url override (local Bot API server).
    pub api_url: Option<String>,
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Install the Prometheus recorder.
    pub prometheus: bool,
    /// Additional labels added to every metric.
    pub labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prometheus: true,
            labels: HashMap::new(),
        }
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
