//! Configuration loading and validation.
//!
//! Config files: `herald.toml`, `herald.yaml` or `herald.json`.
//! Searched in `./` then the user config directory (`~/.config/herald/`).
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load, load_config},
    schema::{HeraldConfig, MetricsConfig, StorageBackend, StorageConfig, TelegramConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
