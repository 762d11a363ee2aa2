//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, YarboError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// Identity of the robot this process is attached to
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Robot serial number, used to namespace issues and recordings
    pub id: String,

    #[serde(default = "default_device_name")]
    pub name: String,
}

/// Telemetry ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default = "default_throttle_interval_s")]
    pub throttle_interval_s: f64,

    #[serde(default = "default_heartbeat_timeout_s")]
    pub heartbeat_timeout_s: u64,

    #[serde(default = "default_watchdog_interval_s")]
    pub watchdog_interval_s: u64,

    /// Seconds between diagnostic polls; 0 disables polling
    #[serde(default = "default_diagnostic_interval_s")]
    pub diagnostic_interval_s: u64,
}

/// Command gateway configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_acquire_timeout_s")]
    pub acquire_timeout_s: f64,

    #[serde(default = "default_feedback_timeout_s")]
    pub feedback_timeout_s: f64,

    /// Route percentage sent with `start_plan`
    #[serde(default)]
    pub plan_start_percent: u8,
}

/// Wire trace recorder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_recorder_dir")]
    pub dir: String,

    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
}

// Default value functions
fn default_device_name() -> String { "Yarbo".to_string() }

fn default_throttle_interval_s() -> f64 { 1.0 }
fn default_heartbeat_timeout_s() -> u64 { 60 }
fn default_watchdog_interval_s() -> u64 { 5 }
fn default_diagnostic_interval_s() -> u64 { 300 }

fn default_acquire_timeout_s() -> f64 { 5.0 }
fn default_feedback_timeout_s() -> f64 { 5.0 }

fn default_recorder_dir() -> String { "./recordings".to_string() }
fn default_max_size_bytes() -> u64 { 10 * 1024 * 1024 }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            throttle_interval_s: default_throttle_interval_s(),
            heartbeat_timeout_s: default_heartbeat_timeout_s(),
            watchdog_interval_s: default_watchdog_interval_s(),
            diagnostic_interval_s: default_diagnostic_interval_s(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_s: default_acquire_timeout_s(),
            feedback_timeout_s: default_feedback_timeout_s(),
            plan_start_percent: 0,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_recorder_dir(),
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

impl CoordinatorConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.throttle_interval_s)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_s)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_s)
    }

    /// `None` when diagnostic polling is disabled
    pub fn diagnostic_interval(&self) -> Option<Duration> {
        (self.diagnostic_interval_s > 0).then(|| Duration::from_secs(self.diagnostic_interval_s))
    }
}

impl GatewayConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.acquire_timeout_s)
    }

    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.feedback_timeout_s)
    }
}

impl RecorderConfig {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

impl Config {
    /// Defaults for every section with the given device serial
    pub fn for_device(id: impl Into<String>) -> Self {
        Self {
            device: DeviceConfig {
                id: id.into(),
                name: default_device_name(),
            },
            coordinator: CoordinatorConfig::default(),
            gateway: GatewayConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use yarbo_link::config::Config;
    ///
    /// let config = Config::load("config/yarbo.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.device.id.trim().is_empty() {
            return Err(invalid("device id cannot be empty"));
        }

        let throttle = self.coordinator.throttle_interval_s;
        if !throttle.is_finite() || !(0.0..=60.0).contains(&throttle) {
            return Err(invalid("throttle_interval_s must be between 0.0 and 60.0"));
        }

        if self.coordinator.heartbeat_timeout_s == 0 {
            return Err(invalid("heartbeat_timeout_s must be greater than 0"));
        }

        if self.coordinator.watchdog_interval_s == 0
            || self.coordinator.watchdog_interval_s > self.coordinator.heartbeat_timeout_s
        {
            return Err(invalid(
                "watchdog_interval_s must be between 1 and heartbeat_timeout_s",
            ));
        }

        let acquire = self.gateway.acquire_timeout_s;
        if !acquire.is_finite() || acquire <= 0.0 || acquire > 60.0 {
            return Err(invalid("acquire_timeout_s must be greater than 0.0 and at most 60.0"));
        }

        let feedback = self.gateway.feedback_timeout_s;
        if !feedback.is_finite() || feedback <= 0.0 || feedback > 60.0 {
            return Err(invalid("feedback_timeout_s must be greater than 0.0 and at most 60.0"));
        }

        if self.gateway.plan_start_percent > 100 {
            return Err(invalid("plan_start_percent must be between 0 and 100"));
        }

        if self.recorder.enabled && self.recorder.dir.is_empty() {
            return Err(invalid("recorder dir cannot be empty when enabled"));
        }

        if self.recorder.max_size_bytes == 0 {
            return Err(invalid("max_size_bytes must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> YarboError {
    YarboError::Config(toml::de::Error::custom(msg))
}
