//! Configuration file parser for `config.toml` in the feedsnap config directory.
//!
//! The config file is optional; a missing or empty file yields
//! `Config::default()`, which has no feeds. Unknown keys are accepted but
//! logged, since they are most likely typos.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::FetchConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level configuration. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed URLs to sync, in order. Normalised by [`Config::feed_urls`].
    pub feeds: Vec<String>,

    /// Hours between scheduled sync cycles.
    pub sync_interval_hours: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted feed body in bytes.
    pub max_feed_bytes: usize,

    /// Database file; defaults to `feedsnap.db` in the config directory.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            sync_interval_hours: 72,
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            database_path: None,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "feeds",
        "sync_interval_hours",
        "request_timeout_secs",
        "max_feed_bytes",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check the size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            feeds = config.feeds.len(),
            interval_hours = config.sync_interval_hours,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// The configured feed list, ready to sync.
    ///
    /// Entries are trimmed. Invalid URLs are skipped and duplicates collapsed
    /// to their first occurrence, each with a warning.
    pub fn feed_urls(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.feeds.len());

        for raw in &self.feeds {
            let candidate = raw.trim();
            if let Err(reason) = validate_feed_url(candidate) {
                tracing::warn!(feed = %candidate, reason = %reason, "Skipping invalid feed URL");
                continue;
            }
            if !seen.insert(candidate.to_string()) {
                tracing::warn!(feed = %candidate, "Duplicate feed URL in config, ignoring");
                continue;
            }
            urls.push(candidate.to_string());
        }

        urls
    }

    /// Cadence of scheduled cycles. Zero hours is raised to one.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_hours.max(1) * 3600)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_feed_bytes: self.max_feed_bytes,
        }
    }

    /// Database location, relative to `config_dir` unless configured.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feedsnap.db"))
    }
}

/// Accept only absolute http(s) URLs with a host.
fn validate_feed_url(candidate: &str) -> Result<(), String> {
    let url = Url::parse(candidate).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{other}'")),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".to_string());
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
