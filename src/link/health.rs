//! # Connection Health
//!
//! Tracks read activity and error counts and derives the healthy flag.
//!
//! Healthy means connected, data seen within the staleness threshold and
//! fewer consecutive errors than the ceiling. It is recomputed on every
//! query; nothing caches it.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthConfig;
use crate::protocol::{MessageLevel, SystemMessage};

/// Health thresholds
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub staleness_threshold: Duration,
    pub max_consecutive_errors: u32,
    pub reset_stats_on_reconnect: bool,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for HealthSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            staleness_threshold: config.staleness_threshold(),
            max_consecutive_errors: config.max_consecutive_errors,
            reset_stats_on_reconnect: config.reset_stats_on_reconnect,
        }
    }
}

/// Cumulative link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total_received: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub unrecognized: u64,
}

/// Edge in the healthy flag as seen by a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Healthy to unhealthy; consumers switch to simulated data
    Degraded,
    /// Unhealthy to healthy; live data again
    Restored,
}

impl Transition {
    /// System message recorded for this edge
    pub fn message(self) -> SystemMessage {
        match self {
            Transition::Degraded => SystemMessage::now(
                MessageLevel::Warning,
                "Connection degraded - switching to simulation mode",
            ),
            Transition::Restored => {
                SystemMessage::now(MessageLevel::Info, "Connection healthy - live data restored")
            }
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    connected: bool,
    last_activity: Option<Instant>,
    counters: Counters,
    last_observed: Option<bool>,
}

/// Connection state tracker
#[derive(Debug)]
pub struct ConnectionTracker {
    settings: HealthSettings,
    state: Mutex<TrackerState>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(HealthSettings::default())
    }
}

impl ConnectionTracker {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Transport opened
    ///
    /// Starts the staleness clock so a fresh link gets one threshold of
    /// grace before its first line.
    pub fn on_connected(&self) {
        let mut state = self.state.lock();
        state.connected = true;
        state.last_activity = Some(Instant::now());
        state.counters.consecutive_errors = 0;
        if self.settings.reset_stats_on_reconnect {
            state.counters = Counters::default();
        }
    }

    pub fn on_disconnected(&self) {
        self.state.lock().connected = false;
    }

    /// A line arrived
    pub fn on_read_activity(&self) {
        let mut state = self.state.lock();
        state.last_activity = Some(Instant::now());
        state.counters.total_received += 1;
        state.counters.consecutive_errors = 0;
    }

    /// A line arrived but could not be classified
    pub fn on_unrecognized(&self) {
        self.state.lock().counters.unrecognized += 1;
    }

    /// An I/O error was observed
    pub fn on_error(&self) {
        let mut state = self.state.lock();
        state.counters.error_count += 1;
        state.counters.consecutive_errors += 1;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock();
        let fresh = state
            .last_activity
            .map_or(false, |at| at.elapsed() < self.settings.staleness_threshold);

        state.connected && fresh && state.counters.consecutive_errors < self.settings.max_consecutive_errors
    }

    /// Time since the last line (or since connecting)
    pub fn time_since_last_read(&self) -> Option<Duration> {
        self.state.lock().last_activity.map(|at| at.elapsed())
    }

    pub fn counters(&self) -> Counters {
        self.state.lock().counters
    }

    /// Remember `healthy` and report whether it flipped since the last call
    ///
    /// The first observation never reports an edge.
    pub fn observe_transition(&self, healthy: bool) -> Option<Transition> {
        let previous = self.state.lock().last_observed.replace(healthy);
        match (previous, healthy) {
            (Some(true), false) => Some(Transition::Degraded),
            (Some(false), true) => Some(Transition::Restored),
            _ => None,
        }
    }
}
