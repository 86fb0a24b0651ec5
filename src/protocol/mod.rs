//! # Device Protocol Module
//!
//! Line-oriented protocol spoken by the sensor board.
//!
//! This module handles:
//! - Typed records carried by inbound lines (readings, messages, stats)
//! - Lenient classification of raw lines into frames
//! - Encoding of outbound JSON and verb-based text commands

pub mod frame;
pub mod parser;
pub mod command;

pub use command::{Command, CommandKind, TextCommand};
pub use frame::{DeviceStats, Frame, MessageLevel, ReadingStatus, SensorReading, SystemMessage};
pub use parser::FrameParser;
