//! # Frame Types
//!
//! Records produced from inbound lines.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest sensor id accepted by default
pub const DEFAULT_MAX_SENSOR_ID: u8 = 64;

/// Status attached to a sensor reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReadingStatus {
    /// Normal reading reported by the device
    Ok,
    /// Reading synthesized while the link is down
    Simulated,
    /// Any other status string the firmware reports (e.g. "disconnected")
    Other(String),
}

impl From<&str> for ReadingStatus {
    fn from(value: &str) -> Self {
        match value {
            "ok" => ReadingStatus::Ok,
            "simulated" => ReadingStatus::Simulated,
            other => ReadingStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for ReadingStatus {
    fn from(value: String) -> Self {
        ReadingStatus::from(value.as_str())
    }
}

impl From<ReadingStatus> for String {
    fn from(value: ReadingStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingStatus::Ok => f.write_str("ok"),
            ReadingStatus::Simulated => f.write_str("simulated"),
            ReadingStatus::Other(s) => f.write_str(s),
        }
    }
}

/// One temperature sample from one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Local>,
    pub sensor_id: u8,
    /// Degrees Celsius
    pub temperature: f64,
    pub status: ReadingStatus,
}

/// Severity of a system message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

impl MessageLevel {
    /// Parse an explicit level field (`info`, `warn`, `warning`, `error`)
    pub fn from_field(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" | "debug" => Some(MessageLevel::Info),
            "warn" | "warning" => Some(MessageLevel::Warning),
            "error" | "err" => Some(MessageLevel::Error),
            _ => None,
        }
    }

    /// Infer a level from free text by keyword
    ///
    /// "error" wins over "warn"; anything else is informational.
    pub fn infer(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        if lower.contains("error") {
            MessageLevel::Error
        } else if lower.contains("warn") {
            MessageLevel::Warning
        } else {
            MessageLevel::Info
        }
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Log line, acknowledgement or link event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub timestamp: DateTime<Local>,
    pub level: MessageLevel,
    pub message: String,
}

impl SystemMessage {
    /// Create a message stamped with the current local time
    pub fn now(level: MessageLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

/// Reply to a `get_stats` request
///
/// The firmware's field set is not fixed, so the object is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub timestamp: DateTime<Local>,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl DeviceStats {
    /// Look up a numeric stats field
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(|v| v.as_u64())
    }
}

/// One classified unit of parsed input
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    SensorReading(SensorReading),
    SystemMessage(SystemMessage),
    Stats(DeviceStats),
    Unrecognized {
        raw: String,
        reason: &'static str,
    },
}

impl Frame {
    /// Short tag used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::SensorReading(_) => "reading",
            Frame::SystemMessage(_) => "message",
            Frame::Stats(_) => "stats",
            Frame::Unrecognized { .. } => "unrecognized",
        }
    }
}
