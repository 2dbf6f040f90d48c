//! Runtime configuration
//!
//! Defaults, optionally overridden by a JSON file and then by `FUNCBASE_*`
//! environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::storage::SqliteConfig;

pub const ENV_DATABASE: &str = "FUNCBASE_DATABASE";
pub const ENV_CACHE_TTL: &str = "FUNCBASE_CACHE_TTL";
pub const ENV_READERS: &str = "FUNCBASE_READERS";
pub const ENV_BUSY_TIMEOUT: &str = "FUNCBASE_BUSY_TIMEOUT_MS";
pub const ENV_STRICT_FIELD_TYPES: &str = "FUNCBASE_STRICT_FIELD_TYPES";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file; `None` for a private in-memory database
    pub database_path: Option<PathBuf>,
    /// Lifetime of cached descriptors and column lists, 0 disables caching
    pub cache_ttl_secs: u64,
    pub reader_pool_size: usize,
    pub busy_timeout_ms: u64,
    /// Reject unsupported field types instead of dropping them
    pub strict_field_types: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_ttl_secs: 300,
            reader_pool_size: 4,
            busy_timeout_ms: 5000,
            strict_field_types: false,
        }
    }
}

impl Config {
    /// Read a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::validation(format!("invalid config {}: {e}", path.display())))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Layer `FUNCBASE_*` environment variables over this configuration
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| env::var(key).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATABASE).filter(|p| !p.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(v) = lookup(ENV_CACHE_TTL) {
            self.cache_ttl_secs = parse_var(ENV_CACHE_TTL, &v)?;
        }
        if let Some(v) = lookup(ENV_READERS) {
            self.reader_pool_size = parse_var(ENV_READERS, &v)?;
        }
        if let Some(v) = lookup(ENV_BUSY_TIMEOUT) {
            self.busy_timeout_ms = parse_var(ENV_BUSY_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_STRICT_FIELD_TYPES) {
            self.strict_field_types = parse_flag(ENV_STRICT_FIELD_TYPES, &v)?;
        }
        Ok(self)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Storage engine settings derived from this configuration
    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig {
            path: self.database_path.clone(),
            reader_pool_size: self.reader_pool_size.max(1),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("{key}: invalid value '{value}'")))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::validation(format!("{key}: invalid flag '{value}'"))),
    }
}
