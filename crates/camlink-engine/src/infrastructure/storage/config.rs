//! TOML-based configuration for the camlink engine.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\CamLink\config.toml`
//! - Linux:    `~/.config/camlink/config.toml`
//! - macOS:    `~/Library/Application Support/CamLink/config.toml`
//!
//! Every field carries a serde default, so a partial file (or none at all)
//! yields a working configuration:
//!
//! ```toml
//! [queue]
//! response_timeout_ms = 2000
//! max_retries = 1
//!
//! [[simulator.cameras]]
//! id = "cam-b"
//! behavior = { mode = "drop_first", count = 1 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::batch::DEFAULT_MAX_HISTORY;
use crate::application::command_queue::{
    QueueConfig, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_RESPONSE_TIMEOUT,
};
use crate::application::control::ControllerConfig;
use crate::application::events::DEFAULT_EVENT_CAPACITY;
use crate::infrastructure::transport::simulated::CameraBehavior;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default)]
    pub simulator: SimulatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Query battery, firmware, and status after registering a camera.
    #[serde(default = "default_true")]
    pub initialize_on_register: bool,
}

/// Per-device command queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSettings {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSettings {
    /// Finished batches kept in memory.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

/// Cameras served by the in-process simulator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorSettings {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Split every reply into notifications of at most this many bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(default = "default_cameras")]
    pub cameras: Vec<SimulatedCameraEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatedCameraEntry {
    pub id: String,
    #[serde(default)]
    pub behavior: CameraBehavior,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}
fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}
fn default_latency_ms() -> u64 {
    20
}
fn default_cameras() -> Vec<SimulatedCameraEntry> {
    ["cam-a", "cam-b", "cam-c"]
        .into_iter()
        .map(|id| SimulatedCameraEntry {
            id: id.to_string(),
            behavior: CameraBehavior::Responsive,
        })
        .collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            initialize_on_register: default_true(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            max_retries: default_max_retries(),
            auto_recovery: default_true(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            chunk_size: None,
            cameras: default_cameras(),
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            max_retries: self.max_retries,
            auto_recovery: self.auto_recovery,
            max_queue_size: self.max_queue_size,
        }
    }
}

impl AppConfig {
    pub fn to_controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            queue: self.queue.to_queue_config(),
            initialize_on_register: self.engine.initialize_on_register,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform path, returning defaults if the file
/// does not exist yet.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning defaults if the file is absent.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CamLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("camlink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("CamLink"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
