//! # Sensor Link
//!
//! Ties the transport, parser, reader, tracker and store together behind
//! one [`Connection`] object.
//!
//! This module handles:
//! - Connecting and disconnecting the serial port
//! - Starting and stopping the background reader
//! - Sending structured and plain-text commands
//! - Telemetry and connection-health queries
//! - Falling back to simulated data while the link is unhealthy

pub mod health;
pub mod reader;
pub mod retry;

pub use health::{ConnectionTracker, Counters, HealthSettings, Transition};
pub use reader::{BackgroundReader, ReaderExit};
pub use retry::{connect_with_retry, RetryPolicy};

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::command::is_single_line;
use crate::protocol::{Command, DeviceStats, FrameParser, MessageLevel, SensorReading, SystemMessage, TextCommand};
use crate::serial::{LineTransport, SerialLineTransport, TransportSettings};
use crate::simulation::{Simulator, DEFAULT_HISTORY_SECS};
use crate::telemetry::TelemetryStore;

/// Derived connection summary, computed on demand
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub is_connected: bool,
    pub is_healthy: bool,
    /// Readings currently buffered
    pub sensor_data_count: usize,
    /// Non-blank lines received
    pub total_received: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub unrecognized: u64,
    pub port_name: Option<String>,
    pub last_error: Option<String>,
    pub ms_since_last_read: Option<u64>,
}

/// Where a snapshot's telemetry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Live,
    Simulated,
}

/// Everything a poller needs for one refresh
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub mode: DataMode,
    pub stats: ConnectionStats,
    pub current: BTreeMap<u8, SensorReading>,
    pub readings: Vec<SensorReading>,
    pub messages: Vec<SystemMessage>,
}

/// Serial link to one sensor board
pub struct Connection {
    config: Config,
    port: Mutex<String>,
    transport: Arc<dyn LineTransport>,
    parser: FrameParser,
    store: Arc<TelemetryStore>,
    tracker: Arc<ConnectionTracker>,
    reader: tokio::sync::Mutex<Option<BackgroundReader>>,
    simulator: Simulator,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &*self.port.lock())
            .field("open", &self.transport.is_open())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection over a real serial port
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(SerialLineTransport::new(TransportSettings::from(&config.serial)));
        Self::with_transport(config, transport)
    }

    /// Create a connection over any line transport
    pub fn with_transport(config: Config, transport: Arc<dyn LineTransport>) -> Self {
        let tracker = ConnectionTracker::new(HealthSettings::from(&config.health));
        let store = TelemetryStore::new(config.buffers.reading_capacity, config.buffers.message_capacity);

        Self {
            port: Mutex::new(config.serial.port.clone()),
            transport,
            parser: FrameParser::new(config.buffers.max_sensor_id),
            store: Arc::new(store),
            tracker: Arc::new(tracker),
            reader: tokio::sync::Mutex::new(None),
            simulator: Simulator::new(config.simulation.sensor_count),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Port used by the next `connect_configured`
    pub fn port(&self) -> String {
        self.port.lock().clone()
    }

    pub fn set_port(&self, port_name: &str) {
        *self.port.lock() = port_name.to_string();
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Open `port_name`, replacing any current connection
    ///
    /// Stops the reader and closes the old port first. Reading does not
    /// start automatically; call [`Connection::start_reading`].
    ///
    /// # Returns
    ///
    /// `false` if the port could not be opened; `last_error` in the
    /// connection stats says why
    pub async fn connect(&self, port_name: &str) -> bool {
        self.stop_reading().await;
        self.transport.disconnect().await;
        self.tracker.on_disconnected();

        if port_name.trim().is_empty() {
            warn!("No serial port given");
            return false;
        }

        self.set_port(port_name);
        let baud_rate = self.config.serial.baud_rate;

        if !self.transport.connect(port_name, baud_rate).await {
            let reason = self.transport.last_error().unwrap_or_else(|| "unknown error".to_string());
            warn!("Could not connect to {}: {}", port_name, reason);
            self.store.record_message(SystemMessage::now(
                MessageLevel::Warning,
                format!("Failed to connect to {}: {}", port_name, reason),
            ));
            return false;
        }

        if self.tracker.settings().reset_stats_on_reconnect {
            self.store.clear();
        }
        self.tracker.on_connected();

        info!("Connected to {} at {} baud", port_name, baud_rate);
        self.store.record_message(SystemMessage::now(
            MessageLevel::Info,
            format!("Connected to {} at {} baud", port_name, baud_rate),
        ));
        true
    }

    /// Connect to the port from config or `set_port`
    pub async fn connect_configured(&self) -> bool {
        let port = self.port();
        self.connect(&port).await
    }

    /// Stop the reader and close the port
    pub async fn disconnect(&self) {
        self.stop_reading().await;

        let was_open = self.transport.is_open();
        self.transport.disconnect().await;
        self.tracker.on_disconnected();

        if was_open {
            info!("Disconnected from {}", self.port());
            self.store
                .record_message(SystemMessage::now(MessageLevel::Info, "Serial connection closed"));
        }
    }

    /// Start the background reader
    ///
    /// Returns `false` when the port is not open. Starting an already
    /// running reader is a no-op that returns `true`.
    pub async fn start_reading(&self) -> bool {
        if !self.transport.is_open() {
            warn!("Cannot start reading: serial port is not open");
            return false;
        }

        let mut slot = self.reader.lock().await;
        if slot.as_ref().map_or(false, BackgroundReader::is_running) {
            debug!("Background reader already running");
            return true;
        }

        *slot = Some(BackgroundReader::start(
            Arc::clone(&self.transport),
            self.parser,
            Arc::clone(&self.store),
            Arc::clone(&self.tracker),
            self.config.serial.read_timeout(),
        ));
        true
    }

    /// Stop the background reader and wait for it to exit
    pub async fn stop_reading(&self) {
        let reader = self.reader.lock().await.take();
        if let Some(mut reader) = reader {
            reader.stop().await;
        }
    }

    pub async fn is_reading(&self) -> bool {
        self.reader
            .lock()
            .await
            .as_ref()
            .map_or(false, BackgroundReader::is_running)
    }

    /// Send a structured command as one JSON line
    pub async fn send_command(&self, command: &Command) -> bool {
        match command.encode() {
            Ok(line) => self.send_line(&line).await,
            Err(e) => {
                warn!("Failed to encode command {}: {}", command.action, e);
                false
            }
        }
    }

    /// Send a raw text command such as `SET_INTERVAL 1000`
    pub async fn send_text_command(&self, text: &str) -> bool {
        self.send_line(text).await
    }

    /// Send a typed text command
    pub async fn send_text(&self, command: &TextCommand) -> bool {
        self.send_line(&command.to_string()).await
    }

    /// Ask the board for a stats reply; it arrives through the reader
    pub async fn request_stats(&self) -> bool {
        self.send_command(&Command::get_stats()).await
    }

    async fn send_line(&self, text: &str) -> bool {
        if !is_single_line(text) {
            warn!("Refusing to send empty or multi-line command: {:?}", text);
            return false;
        }
        if !self.transport.is_open() {
            debug!("Dropping command on closed port: {}", text);
            return false;
        }

        let sent = self.transport.write_line(text).await;
        if !sent {
            self.tracker.on_error();
        }
        sent
    }

    /// Latest reading per sensor
    pub fn get_current_temperatures(&self) -> BTreeMap<u8, SensorReading> {
        self.store.current_temperatures()
    }

    /// The newest `count` readings, oldest first
    pub fn get_latest_sensor_data(&self, count: usize) -> Vec<SensorReading> {
        self.store.recent_readings(count)
    }

    /// The newest `count` system messages, oldest first
    pub fn get_system_messages(&self, count: usize) -> Vec<SystemMessage> {
        self.store.recent_messages(count)
    }

    pub fn latest_device_stats(&self) -> Option<DeviceStats> {
        self.store.latest_stats()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open() && self.tracker.is_connected()
    }

    /// Open port, fresh data and error streak under the ceiling
    pub fn is_healthy(&self) -> bool {
        self.transport.is_open() && self.tracker.is_healthy()
    }

    pub fn get_connection_stats(&self) -> ConnectionStats {
        let counters = self.tracker.counters();
        ConnectionStats {
            is_connected: self.is_connected(),
            is_healthy: self.is_healthy(),
            sensor_data_count: self.store.reading_count(),
            total_received: counters.total_received,
            error_count: counters.error_count,
            consecutive_errors: counters.consecutive_errors,
            unrecognized: counters.unrecognized,
            port_name: self.transport.port_name(),
            last_error: self.transport.last_error(),
            ms_since_last_read: self
                .tracker
                .time_since_last_read()
                .map(|d| d.as_millis() as u64),
        }
    }

    /// Telemetry for one poll, live or simulated
    ///
    /// Live data while healthy. Otherwise simulated data, unless simulation
    /// is disabled, in which case the stale live buffers are returned. A
    /// change in health since the previous call is logged and recorded as a
    /// system message.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let healthy = self.is_healthy();
        if let Some(transition) = self.tracker.observe_transition(healthy) {
            let message = transition.message();
            match transition {
                Transition::Degraded => warn!("{}", message.message),
                Transition::Restored => info!("{}", message.message),
            }
            self.store.record_message(message);
        }

        let reading_count = self.config.buffers.reading_capacity;
        let message_count = self.config.buffers.message_capacity;

        if healthy || !self.config.simulation.enabled {
            return TelemetrySnapshot {
                mode: DataMode::Live,
                stats: self.get_connection_stats(),
                current: self.get_current_temperatures(),
                readings: self.get_latest_sensor_data(reading_count),
                messages: self.get_system_messages(message_count),
            };
        }

        let mut messages = self.get_system_messages(message_count.saturating_sub(1));
        messages.push(self.simulator.message());

        TelemetrySnapshot {
            mode: DataMode::Simulated,
            stats: self.get_connection_stats(),
            current: self.simulator.current(),
            readings: self.simulator.history(DEFAULT_HISTORY_SECS),
            messages,
        }
    }
}
