//! Persistent settings stored as `<config-dir>/config.json`.

use std::io::Write;
use std::path::{Path, PathBuf};

use db::DbConfig;
use queue_core::QueueConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub(crate) const SETTINGS_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub(crate) enum SettingsError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat settings document. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) max_retries: u32,
    pub(crate) backoff_base: f64,
    pub(crate) worker_poll_interval: f64,
    pub(crate) lock_timeout: u64,
    pub(crate) db_endpoint: String,
    pub(crate) db_namespace: String,
    pub(crate) db_database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) db_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) db_password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let queue = QueueConfig::default();
        let db = DbConfig::default();
        Self {
            max_retries: queue.max_retries,
            backoff_base: queue.backoff_base,
            worker_poll_interval: queue.worker_poll_interval,
            lock_timeout: queue.lock_timeout,
            db_endpoint: "ws://127.0.0.1:8000".to_string(),
            db_namespace: db.namespace,
            db_database: db.database,
            db_username: None,
            db_password: None,
        }
    }
}

/// `~/.queuectl`, or `./.queuectl` when there is no home directory.
pub(crate) fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".queuectl")
}

impl Settings {
    /// Load settings from `dir`.
    ///
    /// A missing file is created with defaults. An unreadable one is left in
    /// place and defaults are used.
    pub(crate) fn load(dir: &Path) -> Result<Self, SettingsError> {
        let path = dir.join(SETTINGS_FILE);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let settings = Self::default();
                settings.save(dir)?;
                return Ok(settings);
            }
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_str(&json) {
            Ok(settings) => Ok(settings),
            Err(error) => {
                tracing::warn!(?path, %error, "ignoring unreadable settings, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the settings file via a temp file and a single rename.
    pub(crate) fn save(&self, dir: &Path) -> Result<(), SettingsError> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;

        let temp_path = dir.join(format!("{SETTINGS_FILE}.tmp"));
        let mut temp = std::fs::File::create(&temp_path)?;
        temp.write_all(json.as_bytes())?;
        temp.sync_all()?;
        std::fs::rename(&temp_path, dir.join(SETTINGS_FILE))?;
        Ok(())
    }

    /// Set one key from its textual value. Accepts `max-retries` or `max_retries`.
    pub(crate) fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let key = key.trim().replace('-', "_");
        match key.as_str() {
            "max_retries" => self.max_retries = parse("max_retries", value)?,
            "backoff_base" => {
                self.backoff_base = parse_f64("backoff_base", value, |v| v >= 0.0)?;
            }
            "worker_poll_interval" => {
                self.worker_poll_interval = parse_f64("worker_poll_interval", value, |v| v > 0.0)?;
            }
            "lock_timeout" => self.lock_timeout = parse("lock_timeout", value)?,
            "db_endpoint" => self.db_endpoint = non_empty("db_endpoint", value)?,
            "db_namespace" => self.db_namespace = non_empty("db_namespace", value)?,
            "db_database" => self.db_database = non_empty("db_database", value)?,
            // An empty value clears the credential.
            "db_username" => self.db_username = optional(value),
            "db_password" => self.db_password = optional(value),
            _ => return Err(SettingsError::UnknownKey(key)),
        }
        Ok(())
    }

    /// Every setting as `(key, value)` for display. The password is masked.
    pub(crate) fn entries(&self) -> Vec<(&'static str, String)> {
        let unset = || "(unset)".to_string();
        vec![
            ("max_retries", self.max_retries.to_string()),
            ("backoff_base", self.backoff_base.to_string()),
            ("worker_poll_interval", self.worker_poll_interval.to_string()),
            ("lock_timeout", self.lock_timeout.to_string()),
            ("db_endpoint", self.db_endpoint.clone()),
            ("db_namespace", self.db_namespace.clone()),
            ("db_database", self.db_database.clone()),
            (
                "db_username",
                self.db_username.clone().unwrap_or_else(unset),
            ),
            (
                "db_password",
                self.db_password
                    .as_ref()
                    .map_or_else(unset, |_| "********".to_string()),
            ),
        ]
    }

    pub(crate) fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            worker_poll_interval: self.worker_poll_interval,
            lock_timeout: self.lock_timeout,
        }
    }

    pub(crate) fn db_config(&self) -> DbConfig {
        let config = DbConfig::new(self.db_endpoint.as_str())
            .with_namespace(self.db_namespace.as_str())
            .with_database(self.db_database.as_str());

        match (&self.db_username, &self.db_password) {
            (Some(username), Some(password)) => {
                config.with_credentials(username.as_str(), password.as_str())
            }
            _ => config,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_f64(
    key: &'static str,
    value: &str,
    valid: impl Fn(f64) -> bool,
) -> Result<f64, SettingsError> {
    let parsed: f64 = parse(key, value)?;
    if parsed.is_finite() && valid(parsed) {
        Ok(parsed)
    } else {
        Err(SettingsError::InvalidValue {
            key,
            value: value.to_string(),
        })
    }
}

fn non_empty(key: &'static str, value: &str) -> Result<String, SettingsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SettingsError::InvalidValue {
            key,
            value: value.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
