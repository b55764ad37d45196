//! Configuration validation.
//!
//! Detects unknown/misspelled fields in a config file and reports settings
//! that would make mailers misbehave at runtime.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::schema::{HeraldConfig, StorageBackend};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "mailer",
    /// "storage", "telegram"
    pub category: &'static str,
    /// Dotted path, e.g. "storage.database_url"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Known fields ────────────────────────────────────────────────────────────

const ROOT_KEYS: &[&str] = &["mailer", "storage", "telegram", "metrics"];

/// Field names per section. `None` marks a free-form map.
fn section_keys(section: &str) -> Option<&'static [&'static str]> {
    match section {
        "mailer" => Some(&[
            "interval",
            "runOnStartup",
            "handleRetryAfter",
            "destroyOnComplete",
            "disableEvents",
            "preserve",
            "excludedPlaceholders",
        ]),
        "mailer.interval" => Some(&["kind", "seconds", "periodSeconds"]),
        "storage" => Some(&["backend", "path", "database_url"]),
        "telegram" => Some(&["token", "api_url"]),
        "metrics" => Some(&["enabled", "prometheus", "labels"]),
        _ => None,
    }
}

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

fn check_keys(
    table: &serde_json::Map<String, Value>,
    known: &[&str],
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if !known.contains(&key.as_str()) {
            let message = match suggest(key, known, 3) {
                Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                None => "unknown field".to_string(),
            };
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "unknown-field",
                path,
                message,
            ));
            continue;
        }
        if let (Value::Object(inner), Some(keys)) = (child, section_keys(&path)) {
            check_keys(inner, keys, &path, diagnostics);
        }
    }
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered default file
/// if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        let mut result = validate_config(&HeraldConfig::default());
        result.diagnostics.insert(
            0,
            Diagnostic::new(
                Severity::Info,
                "syntax",
                "",
                "no config file found; using defaults",
            ),
        );
        return result;
    };

    let mut result = match crate::loader::load_config_value(&actual_path) {
        Ok(value) => validate_value(&value),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate an already parsed (untyped) config document.
#[must_use]
pub fn validate_value(value: &Value) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let Some(root) = value.as_object() else {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "syntax",
            "",
            "config root must be a table",
        ));
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };
    check_keys(root, ROOT_KEYS, "", &mut diagnostics);

    match serde_json::from_value::<HeraldConfig>(value.clone()) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Semantic checks on a typed config.
#[must_use]
pub fn validate_config(config: &HeraldConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    if let Err(e) = config.mailer.interval.validate() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "mailer",
            "mailer.interval",
            e.to_string(),
        ));
    }

    match config.storage.backend {
        StorageBackend::Sqlite
            if config
                .storage
                .database_url
                .as_deref()
                .is_none_or(str::is_empty) =>
        {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "storage",
                "storage.database_url",
                "sqlite backend requires a database_url",
            ));
        },
        StorageBackend::Memory if config.mailer.preserve => {
            diagnostics.push(Diagnostic::new(
                Severity::Info,
                "storage",
                "storage.backend",
                "memory backend: mailers are lost on restart",
            ));
        },
        _ => {},
    }

    if config.storage.backend != StorageBackend::Sqlite && config.storage.database_url.is_some() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "storage",
            "storage.database_url",
            "database_url is ignored unless backend = \"sqlite\"",
        ));
    }

    if config.telegram.token.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "telegram",
            "telegram.token",
            "no bot token configured (set telegram.token or HERALD_TELEGRAM_TOKEN)",
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[rstest]
    #[case("kitten", "sitting", 3)]
    #[case("backend", "backend", 0)]
    #[case("", "abc", 3)]
    #[case("databse_url", "database_url", 1)]
    fn levenshtein_distance(#[case] a: &str, #[case] b: &str, #[case] expected: usize) {
        assert_eq!(levenshtein(a, b), expected);
    }

    #[test]
    fn unknown_field_gets_suggestion() {
        let result = validate_value(&json!({
            "storage": { "backend": "file", "databse_url": "x" },
            "telegram": { "token": "1:a" }
        }));
        let diag = find(&result, "storage.databse_url").unwrap();
        assert_eq!(diag.severity, Severity::Error);
        assert!(diag.message.contains("database_url"));
    }

    #[test]
    fn unknown_top_level_section() {
        let result = validate_value(&json!({ "mailers": {} }));
        let diag = find(&result, "mailers").unwrap();
        assert!(diag.message.contains("\"mailer\""));
    }

    #[test]
    fn nested_interval_fields_are_checked() {
        let result = validate_value(&json!({
            "mailer": { "interval": { "kind": "dynamic", "period": 10 } }
        }));
        assert!(find(&result, "mailer.interval.period").is_some());
    }

    #[test]
    fn metrics_labels_are_free_form() {
        let result = validate_value(&json!({
            "metrics": { "labels": { "region": "eu" } },
            "telegram": { "token": "1:a" }
        }));
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn type_errors_are_reported() {
        let result = validate_value(&json!({ "storage": { "backend": "postgres" } }));
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn negative_interval_is_an_error() {
        let result = validate_value(&json!({
            "mailer": { "interval": { "kind": "fixed", "seconds": -1.0 } }
        }));
        let diag = find(&result, "mailer.interval").unwrap();
        assert_eq!(diag.severity, Severity::Error);
    }

    #[test]
    fn sqlite_without_url_is_an_error() {
        let result = validate_value(&json!({ "storage": { "backend": "sqlite" } }));
        assert!(result.has_errors());
        assert!(find(&result, "storage.database_url").is_some());
    }

    #[test]
    fn missing_token_is_a_warning() {
        let result = validate_config(&HeraldConfig::default());
        assert!(!result.has_errors());
        assert_eq!(
            find(&result, "telegram.token").map(|d| d.severity),
            Some(Severity::Warning)
        );
    }

    #[test]
    fn validates_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, "[storage]\nbackend = \"memory\"\n").unwrap();

        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Info), 1);
    }

    #[test]
    fn unreadable_file_is_a_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herald.toml");
        std::fs::write(&path, "[storage\n").unwrap();

        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }
}
