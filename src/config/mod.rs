//! # Configuration Management Module
//!
//! TOML configuration for the bridge, organized into sections:
//!
//! - [`DeviceConfig`] - which link to the monitor and where to find it
//! - [`MonitorConfig`] - NIBP deadline and reconnect/staleness tuning
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ```toml
//! [device]
//! connection = "serial"        # "serial" | "ble"
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ble_name = "BerryMed"
//!
//! [monitor]
//! nibp_timeout_seconds = 90
//! reconnect_interval_seconds = 5
//! stale_after_seconds = 5
//!
//! [logging]
//! level = "info"
//! # file = "berrybridge.log"
//! ```
//!
//! All values carry defaults, are validated on load, and CLI arguments
//! override them (CLI args > config file > defaults).

use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Which physical link the bridge uses to reach the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Serial,
    Ble,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_connection")]
    pub connection: ConnectionKind,
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Substring matched against advertised BLE device names.
    #[serde(default = "default_ble_name")]
    pub ble_name: String,
}

fn default_connection() -> ConnectionKind {
    ConnectionKind::Serial
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_ble_name() -> String {
    "BerryMed".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            ble_name: default_ble_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Deadline after which a stuck NIBP measurement is forced back to idle.
    #[serde(default = "default_nibp_timeout")]
    pub nibp_timeout_seconds: u64,
    /// Delay between reconnect attempts after a lost link.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_seconds: u64,
    /// Silence on a nominally-connected BLE link treated as staleness.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
}

fn default_nibp_timeout() -> u64 {
    90
}

fn default_reconnect_interval() -> u64 {
    5
}

fn default_stale_after() -> u64 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            nibp_timeout_seconds: default_nibp_timeout(),
            reconnect_interval_seconds: default_reconnect_interval(),
            stale_after_seconds: default_stale_after(),
        }
    }
}

impl MonitorConfig {
    pub fn nibp_timeout(&self) -> Duration {
        Duration::from_secs(self.nibp_timeout_seconds)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_seconds)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.port.trim().is_empty() {
            return Err(anyhow!("device.port must not be empty"));
        }
        if self.device.baud_rate == 0 {
            return Err(anyhow!("device.baud_rate must be nonzero"));
        }
        if self.device.ble_name.trim().is_empty() {
            return Err(anyhow!("device.ble_name must not be empty"));
        }
        if self.monitor.nibp_timeout_seconds == 0 {
            return Err(anyhow!("monitor.nibp_timeout_seconds must be nonzero"));
        }
        if self.monitor.reconnect_interval_seconds == 0 {
            return Err(anyhow!("monitor.reconnect_interval_seconds must be nonzero"));
        }
        if self.monitor.stale_after_seconds == 0 {
            return Err(anyhow!("monitor.stale_after_seconds must be nonzero"));
        }
        if self.logging.level.parse::<log::LevelFilter>().is_err() {
            return Err(anyhow!(
                "logging.level '{}' is not a valid log level",
                self.logging.level
            ));
        }
        Ok(())
    }
}
