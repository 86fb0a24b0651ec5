//! # Thermo Link Library
//!
//! Serial telemetry link for a microcontroller temperature sensor array.
//!
//! This library reads newline-delimited JSON frames from the sensor board,
//! keeps a bounded live view of readings and device messages, sends
//! commands back, and tracks link health so callers can fall back to
//! simulated data when the board goes quiet.

pub mod config;
pub mod error;
pub mod link;
pub mod protocol;
pub mod serial;
pub mod simulation;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, ThermoLinkError};
pub use link::{Connection, ConnectionStats, DataMode, TelemetrySnapshot};
