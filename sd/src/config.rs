//! StoryDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use storystore::StoreOptions;

/// Main StoryDaemon configuration
///
/// The whole value is serialized to JSON and stored verbatim as the
/// session's config snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database location and locking
    pub storage: StorageConfig,

    /// Request channel and query deadlines
    pub requests: RequestsConfig,

    /// Startup recovery behavior
    pub recovery: RecoveryConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .storydaemon.yml
        let local_config = PathBuf::from(".storydaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/storydaemon/storydaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("storydaemon").join("storydaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// JSON snapshot stored on the session row
    pub fn snapshot_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config snapshot")
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,

    /// How long to wait on a locked database before failing
    #[serde(rename = "busy-timeout-ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // ~/.local/share/storydaemon/stories.db on Linux
        let db_path = dirs::data_local_dir()
            .map(|d| d.join("storydaemon"))
            .unwrap_or_else(|| PathBuf::from(".storydaemon"))
            .join("stories.db");

        Self {
            db_path,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }
}

/// Request processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    /// Bound of the request channel; producers wait when it is full
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,

    /// Deadline for a query round trip
    #[serde(rename = "query-timeout-ms")]
    pub query_timeout_ms: u64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            query_timeout_ms: 30_000,
        }
    }
}

impl RequestsConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Whether startup resumes the most recent interrupted session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    #[default]
    Auto,
    Never,
}

/// Recovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub resume: ResumePolicy,

    /// Coder agents whose checkpoints are reloaded on resume
    #[serde(rename = "coder-ids")]
    pub coder_ids: Vec<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            resume: ResumePolicy::Auto,
            coder_ids: (1..=3).map(|n| format!("coder-{:03}", n)).collect(),
        }
    }
}
