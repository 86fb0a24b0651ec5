//! # Frame Parser
//!
//! Classifies raw text lines into [`Frame`]s.
//!
//! The firmware mixes JSON frames with plain debug output and emits partial
//! frames while booting, so parsing never fails: anything that is not a
//! well-formed frame becomes either a text message or `Frame::Unrecognized`.

use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use tracing::trace;

use super::frame::*;

/// Lenient line-to-frame classifier
#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    max_sensor_id: u8,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SENSOR_ID)
    }
}

impl FrameParser {
    /// Create a parser accepting sensor ids `1..=max_sensor_id`
    pub fn new(max_sensor_id: u8) -> Self {
        Self { max_sensor_id }
    }

    /// Parse a line, stamping the result with the current time
    ///
    /// # Examples
    ///
    /// ```
    /// use thermo_link::protocol::{Frame, FrameParser};
    ///
    /// let parser = FrameParser::default();
    /// match parser.parse(r#"{"sensor_id":3,"temperature":24.8,"status":"ok"}"#) {
    ///     Frame::SensorReading(r) => assert_eq!(r.sensor_id, 3),
    ///     other => panic!("unexpected frame: {:?}", other),
    /// }
    /// ```
    pub fn parse(&self, raw_line: &str) -> Frame {
        self.parse_at(raw_line, Local::now())
    }

    /// Parse raw bytes, replacing invalid UTF-8
    pub fn parse_bytes(&self, raw: &[u8]) -> Frame {
        self.parse(&String::from_utf8_lossy(raw))
    }

    /// Parse a line with an explicit receive timestamp
    pub fn parse_at(&self, raw_line: &str, timestamp: DateTime<Local>) -> Frame {
        let line = raw_line.trim();
        if line.is_empty() {
            return unrecognized(raw_line, "empty line");
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(obj)) => self.classify_object(line, obj, timestamp),
            Ok(_) => text_message(line, timestamp),
            Err(e) => {
                // A brace-led line is a frame cut short, not a log line
                if line.starts_with('{') {
                    trace!("Truncated JSON frame ({}): {}", e, line);
                    unrecognized(line, "malformed JSON frame")
                } else {
                    text_message(line, timestamp)
                }
            }
        }
    }

    fn classify_object(&self, line: &str, obj: Map<String, Value>, timestamp: DateTime<Local>) -> Frame {
        if obj.contains_key("sensor_id") && obj.contains_key("temperature") {
            return self.reading_from(line, &obj, timestamp);
        }

        let is_stats = obj.get("type").and_then(Value::as_str) == Some("stats")
            || obj.get("stats").map_or(false, Value::is_object);
        if is_stats {
            let nested = obj.get("stats").and_then(Value::as_object).cloned();
            return Frame::Stats(DeviceStats {
                timestamp,
                fields: nested.unwrap_or(obj),
            });
        }

        if let Some(text) = obj.get("message").and_then(Value::as_str) {
            let level = obj
                .get("level")
                .and_then(Value::as_str)
                .and_then(MessageLevel::from_field)
                .unwrap_or_else(|| MessageLevel::infer(text));
            return Frame::SystemMessage(SystemMessage {
                timestamp,
                level,
                message: text.to_string(),
            });
        }

        unrecognized(line, "unknown JSON object")
    }

    fn reading_from(&self, line: &str, obj: &Map<String, Value>, timestamp: DateTime<Local>) -> Frame {
        let sensor_id = match obj.get("sensor_id").and_then(coerce_u64) {
            Some(id) if id >= 1 && id <= self.max_sensor_id as u64 => id as u8,
            Some(_) => return unrecognized(line, "sensor_id out of range"),
            None => return unrecognized(line, "sensor_id is not an integer"),
        };

        let temperature = match obj.get("temperature").and_then(coerce_f64) {
            Some(t) if t.is_finite() => t,
            _ => return unrecognized(line, "temperature is not a finite number"),
        };

        let status = match obj.get("status") {
            None | Some(Value::Null) => ReadingStatus::Ok,
            Some(Value::String(s)) => ReadingStatus::from(s.as_str()),
            Some(_) => return unrecognized(line, "status is not a string"),
        };

        Frame::SensorReading(SensorReading {
            timestamp,
            sensor_id,
            temperature,
            status,
        })
    }
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            // Accept 3.0 but not 3.5
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_message(line: &str, timestamp: DateTime<Local>) -> Frame {
    Frame::SystemMessage(SystemMessage {
        timestamp,
        level: MessageLevel::infer(line),
        message: line.to_string(),
    })
}

fn unrecognized(raw: &str, reason: &'static str) -> Frame {
    Frame::Unrecognized {
        raw: raw.to_string(),
        reason,
    }
}
