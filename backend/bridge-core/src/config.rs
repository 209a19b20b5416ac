//! Bridge configuration: load/save/validate.
//!
//! One JSON file covers both sides of the bridge; the host reads the
//! listener and dispatcher sections, the automation client reads the client
//! section. Missing fields fall back to defaults so an old config file keeps
//! working after an upgrade.

use crate::connector::ConnectorConfig;
use crate::error::config::ConfigError;
use crate::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::{BRIDGE_HOSTNAME, DEFAULT_BRIDGE_PORT};

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "bridge.json";
const CONFIG_VERSION: u32 = 1;

/// Smallest frame bound we accept; anything lower can't even carry a ping.
const MIN_FRAME_BYTES: usize = 1024;

// ============================================
// CONFIG STRUCTS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_bytes: default_max_frame_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Nesting bound for result encoding; deeper values truncate.
    #[serde(default = "default_encode_max_depth")]
    pub encode_max_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            encode_max_depth: default_encode_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_call_timeout_ms")]
    pub default_call_timeout_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_call_timeout_ms: default_call_timeout_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            listener: ListenerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_host() -> String {
    BRIDGE_HOSTNAME.to_string()
}
fn default_port() -> u16 {
    DEFAULT_BRIDGE_PORT
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_queue_capacity() -> usize {
    32
}
fn default_encode_max_depth() -> usize {
    64
}
fn default_call_timeout_ms() -> u64 {
    15_000
}
fn default_backoff_initial_ms() -> u64 {
    1_000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_probe_timeout_ms() -> u64 {
    2_000
}

// ============================================
// IMPLEMENTATION
// ============================================

impl BridgeConfig {
    /// Load config from `{config_dir}/bridge.json`.
    ///
    /// A missing file yields defaults; a file that exists but cannot be read
    /// or parsed is an error (a half-applied config is worse than none).
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read config file: {}", e);
            ConfigError::ReadError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: BridgeConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse config JSON: {}", e);
            ConfigError::ParseError {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to `{config_dir}/bridge.json` using atomic write
    /// (temp file + rename, so a crash cannot leave a torn file).
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::WriteError {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Validate config values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "Invalid version: {} (expected 1-{})",
                    self.version, CONFIG_VERSION
                ),
            });
        }

        if self.listener.queue_capacity == 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }

        if self.listener.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "max_frame_bytes {} below minimum {}",
                    self.listener.max_frame_bytes, MIN_FRAME_BYTES
                ),
            });
        }

        if self.dispatcher.encode_max_depth == 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "encode_max_depth must be at least 1".to_string(),
            });
        }

        if self.client.backoff_initial_ms == 0
            || self.client.backoff_initial_ms > self.client.backoff_max_ms
        {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: format!(
                    "backoff_initial_ms {} must be nonzero and at most backoff_max_ms {}",
                    self.client.backoff_initial_ms, self.client.backoff_max_ms
                ),
            });
        }

        if self.client.default_call_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                location: ErrorLocation::from(Location::caller()),
                reason: "default_call_timeout_ms must be nonzero".to_string(),
            });
        }

        Ok(())
    }

    /// The connector settings implied by the client section.
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            host: self.client.host.clone(),
            port: self.client.port,
            max_frame_bytes: self.listener.max_frame_bytes,
            backoff_initial: Duration::from_millis(self.client.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.client.backoff_max_ms),
            probe_timeout: Duration::from_millis(self.client.probe_timeout_ms),
        }
    }

    /// Per-call deadline the client section asks for.
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.client.default_call_timeout_ms)
    }
}

/// Platform config directory for the bridge, when one exists.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("hostbridge"))
}
