//! Configuration module for FileGuard.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FILEGUARD_ROOTS` | Yes | - | Comma-separated list of directories to monitor |
//! | `FILEGUARD_DB_PATH` | No | `file_integrity.db` | SQLite ledger path (`sqlite:///` prefix is stripped) |
//! | `FILEGUARD_WEBHOOK_URL` | No | - | Notification webhook; when unset, notices are logged only |
//! | `FILEGUARD_CHANNEL_CAPACITY` | No | 1024 | Watch-event channel capacity |
//!
//! Root entries are validated (exists, is a directory) by the path resolver,
//! not here; invalid entries are dropped with a warning at startup.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Default ledger database path.
const DEFAULT_DB_PATH: &str = "file_integrity.db";

/// Default watch-event channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// URL-style prefix accepted (and stripped) on the database path.
const SQLITE_URL_PREFIX: &str = "sqlite:///";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the FileGuard monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Monitored root directories, in configuration order. Not yet validated.
    pub roots: Vec<String>,

    /// Path to the SQLite ledger database.
    pub db_path: PathBuf,

    /// Optional webhook endpoint for change notifications.
    pub webhook_url: Option<String>,

    /// Capacity of the watch-event channel.
    pub channel_capacity: usize,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `FILEGUARD_ROOTS` is not set or contains no entries
    /// - `FILEGUARD_CHANNEL_CAPACITY` is set but is not a positive integer
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(|key| env::var(key).ok())
    }

    /// Parses configuration from an arbitrary variable source.
    ///
    /// `from_env` supplies `std::env::var`; tests supply a map.
    pub fn parse(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Required: FILEGUARD_ROOTS, comma-separated
        let roots_raw = var("FILEGUARD_ROOTS")
            .ok_or_else(|| ConfigError::MissingEnvVar("FILEGUARD_ROOTS".to_string()))?;

        let roots: Vec<String> = roots_raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if roots.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "FILEGUARD_ROOTS".to_string(),
                message: "expected at least one directory".to_string(),
            });
        }

        // Optional: FILEGUARD_DB_PATH (default: file_integrity.db)
        let db_path = var("FILEGUARD_DB_PATH")
            .map(|raw| {
                // Accept a sqlite:/// URL and reduce it to the file path.
                raw.strip_prefix(SQLITE_URL_PREFIX)
                    .map(str::to_string)
                    .unwrap_or(raw)
            })
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        // Optional: FILEGUARD_WEBHOOK_URL (default: log-only dispatch)
        let webhook_url = var("FILEGUARD_WEBHOOK_URL").filter(|s| !s.trim().is_empty());

        // Optional: FILEGUARD_CHANNEL_CAPACITY (default: 1024, must be > 0)
        let channel_capacity = match var("FILEGUARD_CHANNEL_CAPACITY") {
            Some(val) => {
                let capacity = val
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "FILEGUARD_CHANNEL_CAPACITY".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if capacity == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "FILEGUARD_CHANNEL_CAPACITY".to_string(),
                        message: "capacity must be greater than 0".to_string(),
                    });
                }
                capacity
            }
            None => DEFAULT_CHANNEL_CAPACITY,
        };

        Ok(Self {
            roots,
            db_path,
            webhook_url,
            channel_capacity,
        })
    }
}
