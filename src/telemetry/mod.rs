//! # Telemetry Module
//!
//! In-memory view of what the sensor board has reported.
//!
//! This module handles:
//! - Fixed-capacity FIFO rings for recent readings and messages
//! - The latest reading per sensor id
//! - The last stats reply from the device
//! - Lock-per-collection access for a concurrent poller

pub mod ring;
pub mod store;

pub use ring::Ring;
pub use store::TelemetryStore;
