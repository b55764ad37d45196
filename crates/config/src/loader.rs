use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::{HeraldConfig, StorageBackend},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HeraldConfig> {
    let raw = read_substituted(path)?;
    parse_config(&raw, path)
}

/// Load a config file as an untyped JSON value, for validation.
pub(crate) fn load_config_value(path: &Path) -> Result<serde_json::Value> {
    let raw = read_substituted(path)?;
    parse_config_value(&raw, path)
}

fn read_substituted(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(substitute_env(&raw))
}

/// Load the explicitly given file, or discover one in the standard
/// locations. Environment overrides are applied in both cases.
pub fn load(explicit: Option<&Path>) -> Result<HeraldConfig> {
    let config = match explicit {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(path)?
        },
        None => discover_and_load(),
    };
    Ok(apply_env_overrides(config))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/herald/herald.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HeraldConfig::default()` if no config file is found or the
/// file cannot be loaded.
pub fn discover_and_load() -> HeraldConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    HeraldConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/herald/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "herald").map(|d| d.config_dir().to_path_buf())
}

/// Apply `HERALD_*` environment variables on top of the loaded config.
///
/// - `HERALD_TELEGRAM_TOKEN` sets the bot token
/// - `HERALD_DATABASE_URL` selects the sqlite backend with that url
pub fn apply_env_overrides(config: HeraldConfig) -> HeraldConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: HeraldConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> HeraldConfig {
    if let Some(token) = lookup("HERALD_TELEGRAM_TOKEN").filter(|t| !t.is_empty()) {
        config.telegram.token = Some(Secret::new(token));
    }
    if let Some(url) = lookup("HERALD_DATABASE_URL").filter(|u| !u.is_empty()) {
        config.storage.backend = StorageBackend::Sqlite;
        config.storage.database_url = Some(url);
    }
    config
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> Result<HeraldConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::unsupported_format(ext)),
    }
}

fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    match extension(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::unsupported_format(ext)),
    }
}
