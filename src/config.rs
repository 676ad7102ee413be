//! Configuration file parser for linklog.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Unknown timezone: {0}")]
    Timezone(String),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feed title shown on every published page.
    pub title: String,

    /// Author name stamped into published entries.
    pub author: String,

    /// Absolute base URL of the deployment, with trailing slash.
    /// Becomes the feed `xml:base`.
    pub base_url: String,

    /// IANA timezone name used to bucket entries into day views.
    pub timezone: String,

    /// Entries per published page. Values below 1 are clamped to 1.
    pub links_per_page: usize,

    /// Skin directory under `assets/` the page stylesheets come from.
    pub skin: String,

    /// Root directory of the published page tree.
    pub pub_dir: PathBuf,

    /// Directory holding the canonical feed file and the lock file.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "linklog".to_string(),
            author: String::new(),
            base_url: String::new(),
            timezone: "UTC".to_string(),
            links_per_page: 100,
            skin: "default".to_string(),
            pub_dir: PathBuf::from("pub"),
            data_dir: PathBuf::from("app/var"),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
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
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "title",
                "author",
                "base_url",
                "timezone",
                "links_per_page",
                "skin",
                "pub_dir",
                "data_dir",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), title = %config.title, "Loaded configuration");
        Ok(config)
    }

    /// The configured timezone, resolved against the IANA database.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    /// Canonical feed file.
    pub fn feed_path(&self) -> PathBuf {
        self.data_dir.join("pub.atom")
    }

    /// Publication run lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("lock")
    }
}

// ============================================================================
// Tests
// ============================================================================
