//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section is optional; missing keys fall back to the documented
//! defaults below, so an empty file is a valid configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ThermoLinkError};

/// Baud rates accepted for the sensor board
pub const SUPPORTED_BAUD_RATES: &[u32] = &[9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub buffers: BufferConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Port name; empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Poll timeout for a single line read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Pulse DTR after opening to reboot the board
    #[serde(default)]
    pub reset_on_connect: bool,

    /// Time the board needs after a DTR reset before it talks
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
}

/// Connection health configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Reset received/error counters on every successful connect
    #[serde(default)]
    pub reset_stats_on_reconnect: bool,
}

/// Telemetry buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_reading_capacity")]
    pub reading_capacity: usize,

    #[serde(default = "default_message_capacity")]
    pub message_capacity: usize,

    #[serde(default = "default_max_sensor_id")]
    pub max_sensor_id: u8,
}

/// Connect retry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Simulated data configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_enabled")]
    pub enabled: bool,

    #[serde(default = "default_sensor_count")]
    pub sensor_count: u8,
}

// Default value functions
fn default_baud_rate() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_boot_delay_ms() -> u64 { 2000 }

fn default_staleness_threshold_ms() -> u64 { 5000 }
fn default_max_consecutive_errors() -> u32 { 3 }

fn default_reading_capacity() -> usize { 50 }
fn default_message_capacity() -> usize { 10 }
fn default_max_sensor_id() -> u8 { 64 }

fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 2000 }

fn default_simulation_enabled() -> bool { true }
fn default_sensor_count() -> u8 { 4 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reset_on_connect: false,
            boot_delay_ms: default_boot_delay_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: default_staleness_threshold_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            reset_stats_on_reconnect: false,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            reading_capacity: default_reading_capacity(),
            message_capacity: default_message_capacity(),
            max_sensor_id: default_max_sensor_id(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: default_simulation_enabled(),
            sensor_count: default_sensor_count(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }
}

impl HealthConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
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
    /// use thermo_link::config::Config;
    ///
    /// let config = Config::load("config/thermo-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
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
        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10000 {
            return Err(invalid("read_timeout_ms must be between 1 and 10000"));
        }

        if self.serial.connect_timeout_ms == 0 || self.serial.connect_timeout_ms > 60000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 60000"));
        }

        if self.serial.boot_delay_ms > 60000 {
            return Err(invalid("boot_delay_ms must not exceed 60000"));
        }

        if self.health.staleness_threshold_ms == 0 {
            return Err(invalid("staleness_threshold_ms must be greater than 0"));
        }

        // Staleness shorter than one poll would flap between reads
        if self.health.staleness_threshold_ms <= self.serial.read_timeout_ms {
            return Err(invalid("staleness_threshold_ms must be greater than read_timeout_ms"));
        }

        if self.health.max_consecutive_errors == 0 {
            return Err(invalid("max_consecutive_errors must be greater than 0"));
        }

        if self.buffers.reading_capacity == 0 {
            return Err(invalid("reading_capacity must be greater than 0"));
        }

        if self.buffers.message_capacity == 0 {
            return Err(invalid("message_capacity must be greater than 0"));
        }

        if self.buffers.max_sensor_id == 0 {
            return Err(invalid("max_sensor_id must be greater than 0"));
        }

        if self.reconnect.max_attempts == 0 {
            return Err(invalid("max_attempts must be greater than 0"));
        }

        if self.reconnect.retry_delay_ms > 60000 {
            return Err(invalid("retry_delay_ms must not exceed 60000"));
        }

        if self.simulation.sensor_count == 0
            || self.simulation.sensor_count > self.buffers.max_sensor_id
        {
            return Err(invalid("sensor_count must be between 1 and max_sensor_id"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> ThermoLinkError {
    ThermoLinkError::Config(toml::de::Error::custom(msg))
}
