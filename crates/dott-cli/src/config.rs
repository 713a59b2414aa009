//! Configuration system for the OpenDOTT CLI.

use dott_core::config::is_plain_name;
use dott_core::{DEFAULT_IMAGE_NAME, MAX_IMAGE_SIZE, TransferMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest write a single ATT packet can carry
pub const MAX_CHUNK_SIZE: usize = 512;

/// OpenDOTT configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Image storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Protocol variant: "declared" or "open-ended"
    #[serde(default = "default_mode")]
    pub mode: TransferMode,
    /// Largest declared image size
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,
    /// Buffer capacity for open-ended uploads
    #[serde(default = "default_open_ended_capacity")]
    pub open_ended_capacity: usize,
    /// Open-ended inactivity window in milliseconds
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    /// Name the committed image is stored under
    #[serde(default = "default_image_name")]
    pub image_name: String,
    /// Event queue depth
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Write size used by the simulator
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Image storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the committed image
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// Storage quota in bytes
    #[serde(default = "default_quota")]
    pub quota: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values

fn default_mode() -> TransferMode {
    TransferMode::OpenEnded
}

fn default_max_image_size() -> usize {
    MAX_IMAGE_SIZE
}

fn default_open_ended_capacity() -> usize {
    dott_core::config::DEFAULT_OPEN_ENDED_CAPACITY
}

fn default_inactivity_timeout_ms() -> u64 {
    3000
}

fn default_image_name() -> String {
    DEFAULT_IMAGE_NAME.to_string()
}

fn default_queue_depth() -> usize {
    dott_core::config::DEFAULT_QUEUE_DEPTH
}

fn default_chunk_size() -> usize {
    244 // ATT payload at a 247 byte MTU
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("opendott/images")
}

fn default_quota() -> u64 {
    MAX_IMAGE_SIZE as u64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_image_size: default_max_image_size(),
            open_ended_capacity: default_open_ended_capacity(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            image_name: default_image_name(),
            queue_depth: default_queue_depth(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            quota: default_quota(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("opendott/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Transfer core configuration
    #[must_use]
    pub fn to_transfer_config(&self) -> dott_core::TransferConfig {
        dott_core::TransferConfig {
            mode: self.transfer.mode,
            max_image_size: self.transfer.max_image_size,
            open_ended_capacity: self.transfer.open_ended_capacity,
            inactivity_timeout: Duration::from_millis(self.transfer.inactivity_timeout_ms),
            image_name: self.transfer.image_name.clone(),
            queue_depth: self.transfer.queue_depth,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.to_transfer_config().validate()?;

        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("Chunk size must be between 1 and {} bytes", MAX_CHUNK_SIZE);
        }

        if !is_plain_name(&self.transfer.image_name) {
            anyhow::bail!("Invalid image name: {}", self.transfer.image_name);
        }

        if self.storage.quota == 0 {
            anyhow::bail!("Storage quota must be non-zero");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
