//! # Command Encoder
//!
//! Encodes outbound commands for the sensor board.
//!
//! Two grammars are understood by the firmware:
//! - single-line JSON objects: `{"type":"config","action":"toggle_json_mode"}`
//! - verb lines: `SET_ID 2 1`, `SET_THRESHOLD 3 -10.0 60.0`, `SET_INTERVAL 1000`

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::Result;

/// Category of a structured command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Changes device behaviour
    Config,
    /// Asks the device to report something
    Request,
}

/// Structured command sent as one JSON line
///
/// Parameters are flattened next to `type` and `action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Command {
    pub fn new(kind: CommandKind, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Add a parameter; `type` and `action` are reserved and ignored
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" && key != "action" {
            self.params.insert(key, value.into());
        }
        self
    }

    /// Switch the firmware between JSON and human-readable output
    pub fn toggle_json_mode() -> Self {
        Self::new(CommandKind::Config, "toggle_json_mode")
    }

    /// Ask the firmware for a stats reply
    pub fn get_stats() -> Self {
        Self::new(CommandKind::Request, "get_stats")
    }

    /// Encode as a single JSON line without the trailing newline
    ///
    /// # Examples
    ///
    /// ```
    /// use thermo_link::protocol::Command;
    ///
    /// let line = Command::get_stats().encode()?;
    /// assert_eq!(line, r#"{"type":"request","action":"get_stats"}"#);
    /// # Ok::<(), thermo_link::error::ThermoLinkError>(())
    /// ```
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Verb-based text command
#[derive(Debug, Clone, PartialEq)]
pub enum TextCommand {
    /// Reassign a sensor id: `SET_ID <old> <new>`
    SetId { old_id: u8, new_id: u8 },
    /// Alarm window for one sensor: `SET_THRESHOLD <id> <low> <high>`
    SetThreshold { sensor_id: u8, low: f64, high: f64 },
    /// Measurement period, globally or for one sensor: `SET_INTERVAL [<id>] <ms>`
    SetInterval { sensor_id: Option<u8>, interval_ms: u32 },
}

impl fmt::Display for TextCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `{:?}` keeps the decimal point on whole floats (-10.0, not -10)
        match self {
            TextCommand::SetId { old_id, new_id } => write!(f, "SET_ID {} {}", old_id, new_id),
            TextCommand::SetThreshold { sensor_id, low, high } => {
                write!(f, "SET_THRESHOLD {} {:?} {:?}", sensor_id, low, high)
            }
            TextCommand::SetInterval { sensor_id: Some(id), interval_ms } => {
                write!(f, "SET_INTERVAL {} {}", id, interval_ms)
            }
            TextCommand::SetInterval { sensor_id: None, interval_ms } => {
                write!(f, "SET_INTERVAL {}", interval_ms)
            }
        }
    }
}

/// Check that text can go out as exactly one protocol line
pub fn is_single_line(text: &str) -> bool {
    !text.trim().is_empty() && !text.contains(['\n', '\r'])
}
