//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FRANCIS_POLL_INTERVAL_MS=250                                       │
//! │     FRANCIS_DATABASE_PATH=/var/lib/francis/sync.db                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/francis/sync.toml (Linux)                                │
//! │     ~/Library/Application Support/com.francis.francis/sync.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [engine]
//! poll_interval_ms = 1000
//! default_max_retries = 3
//! batch_size = 100
//! auto_schedule = true
//!
//! [webhooks]
//! queue_capacity = 256
//! request_timeout_secs = 10
//!
//! [storage]
//! database_path = "/var/lib/francis/sync.db"
//!
//! [providers.crm]
//! base_url = "https://crm.internal/api"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Engine Settings
// =============================================================================

/// Scheduler and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Interval between scheduler ticks (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Retry budget for operations that don't set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Records fetched per page from a provider.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Enqueue due interval profiles on every tick.
    #[serde(default = "default_true")]
    pub auto_schedule: bool,

    /// Default `limit` for operation listings.
    #[serde(default = "default_history_limit")]
    pub operation_history_limit: usize,
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    francis_core::DEFAULT_MAX_RETRIES
}
fn default_batch_size() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_history_limit() -> usize {
    francis_core::DEFAULT_OPERATIONS_LIMIT
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            poll_interval_ms: default_poll_interval(),
            default_max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            auto_schedule: true,
            operation_history_limit: default_history_limit(),
        }
    }
}

// =============================================================================
// Webhook Settings
// =============================================================================

/// Webhook dispatcher settings.
///
/// Per-endpoint multiplier, cap and retry count come from each endpoint's
/// `retry_config`; these are the dispatcher-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Bounded delivery queue size. Deliveries beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// First retry delay (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum concurrent deliveries.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_request_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_in_flight() -> usize {
    8
}

impl Default for WebhookSettings {
    fn default() -> Self {
        WebhookSettings {
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

// =============================================================================
// Storage & Providers
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file; defaults to `francis.db` in the platform data dir.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// HTTP endpoint of one source/target API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: String,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub webhooks: WebhookSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    /// Keyed by the opaque API id used in profiles (`source_api`, `target_api`).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }

        if self.engine.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.webhooks.queue_capacity == 0 || self.webhooks.max_in_flight == 0 {
            return Err(SyncError::InvalidConfig(
                "webhook queue_capacity and max_in_flight must be greater than 0".into(),
            ));
        }

        for (api, provider) in &self.providers {
            let parsed = url::Url::parse(&provider.base_url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "Provider '{}' base_url must be http(s), got: {}",
                    api, provider.base_url
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FRANCIS_POLL_INTERVAL_MS") {
            match value.parse::<u64>() {
                Ok(ms) => {
                    debug!(poll_interval_ms = ms, "Overriding poll interval from environment");
                    self.engine.poll_interval_ms = ms;
                }
                Err(_) => warn!(value = %value, "Ignoring invalid FRANCIS_POLL_INTERVAL_MS"),
            }
        }

        if let Ok(value) = std::env::var("FRANCIS_MAX_RETRIES") {
            if let Ok(n) = value.parse::<u32>() {
                self.engine.default_max_retries = n;
            }
        }

        if let Ok(value) = std::env::var("FRANCIS_BATCH_SIZE") {
            if let Ok(n) = value.parse::<usize>() {
                self.engine.batch_size = n;
            }
        }

        if let Ok(value) = std::env::var("FRANCIS_AUTO_SCHEDULE") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.engine.auto_schedule = true,
                "0" | "false" | "no" | "off" => self.engine.auto_schedule = false,
                _ => warn!(value = %value, "Unknown FRANCIS_AUTO_SCHEDULE value"),
            }
        }

        if let Ok(path) = std::env::var("FRANCIS_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "francis", "francis")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.poll_interval_ms)
    }

    /// Resolved database path: configured, else the platform data dir.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.storage.database_path.clone().or_else(|| {
            Self::project_dirs().map(|dirs| dirs.data_dir().join("francis.db"))
        })
    }

    /// Base URL of the provider registered under `api`.
    pub fn provider_url(&self, api: &str) -> Option<&str> {
        self.providers.get(api).map(|p| p.base_url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.engine.poll_interval_ms, 1000);
        assert_eq!(config.engine.default_max_retries, 3);
        assert_eq!(config.engine.batch_size, 100);
        assert!(config.engine.auto_schedule);
        assert_eq!(config.engine.operation_history_limit, 50);
        assert_eq!(config.webhooks.queue_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.engine.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.providers.insert(
            "crm".into(),
            ProviderSettings {
                base_url: "ftp://crm.example.com".into(),
            },
        );
        assert!(config.validate().is_err());

        config.providers.insert(
            "crm".into(),
            ProviderSettings {
                base_url: "https://crm.example.com/api".into(),
            },
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.provider_url("crm"), Some("https://crm.example.com/api"));
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        std::fs::write(
            &path,
            r#"
            [engine]
            batch_size = 25

            [providers.ledger]
            base_url = "http://localhost:9000"
            "#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(config.engine.batch_size, 25);
        assert_eq!(config.engine.default_max_retries, 3);
        assert_eq!(config.provider_url("ledger"), Some("http://localhost:9000"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = EngineConfig::default();
        config.engine.poll_interval_ms = 250;
        config.save(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.engine.poll_interval_ms, 250);
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[webhooks]"));
    }
}
