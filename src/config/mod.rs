//! Runtime configuration for the local time-shift buffer subsystem.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tsb: TsbConfig,
    pub writer: WriterConfig,
    pub logging: LoggingConfig,
}

/// Mirrors the configuration options a real AAMP deployment exposes for the
/// local TSB: retention window, backing location, and space policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsbConfig {
    /// Target retention window, in seconds, used by the default cull horizon.
    pub tsb_length_secs: f64,
    /// Backing storage location for the content-keyed blob store.
    pub tsb_location: PathBuf,
    /// Writes fail with `NoSpace` once free space drops below this percentage.
    pub tsb_min_free_percentage: u8,
    /// Hard quota, in bytes, for the store's own size accounting.
    pub tsb_max_disk_storage_bytes: u64,
}

/// Operational tuning for the dedicated writer thread; not part of the
/// AAMP-visible configuration surface but needed by any production writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Capacity of the bounded write-task queue before oldest-task drop kicks in.
    pub queue_capacity: usize,
    /// Warn when a `TracedMutex` acquisition blocks longer than this, in millis.
    pub slow_lock_warn_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of TRACE, INFO, WARN, ERROR.
    pub tsb_log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tsb: TsbConfig {
                tsb_length_secs: 1800.0,
                tsb_location: PathBuf::from("./data/tsb"),
                tsb_min_free_percentage: 5,
                tsb_max_disk_storage_bytes: 2 * 1024 * 1024 * 1024,
            },
            writer: WriterConfig {
                queue_capacity: 256,
                slow_lock_warn_ms: 50,
            },
            logging: LoggingConfig {
                tsb_log_level: "INFO".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("TSB_CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::create_dir_all(&default_config.tsb.tsb_location)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
