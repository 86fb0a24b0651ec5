//! # Error Types
//!
//! Custom error types for Thermo Link using `thiserror`.
//!
//! Only the fallible edges of the crate (configuration loading, opening a
//! port, encoding commands) return these. The connection surface itself
//! reports expected failures as `bool`/`Option` values.

use thiserror::Error;

/// Main error type for Thermo Link
#[derive(Debug, Error)]
pub enum ThermoLinkError {
    /// Serial port errors (open, configure, reset)
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate ports could be opened
    #[error("Serial port not found: {0}")]
    SerialPortNotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON encoding errors for outbound commands
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Thermo Link
pub type Result<T> = std::result::Result<T, ThermoLinkError>;
