//! # Background Reader
//!
//! Dedicated task that pulls lines off the transport, parses them and
//! routes the frames into the telemetry store.
//!
//! The loop never reconnects on its own. A fatal read error ends it; the
//! owner decides whether to call `connect` again.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::health::ConnectionTracker;
use crate::protocol::{Frame, FrameParser, MessageLevel, SystemMessage};
use crate::serial::LineTransport;
use crate::telemetry::TelemetryStore;

/// Why the reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// `stop()` was requested
    Stopped,
    /// The transport reported a fatal I/O error
    TransportFailed,
}

/// Everything the loop touches
struct ReaderContext {
    transport: Arc<dyn LineTransport>,
    parser: FrameParser,
    store: Arc<TelemetryStore>,
    tracker: Arc<ConnectionTracker>,
    poll_timeout: Duration,
}

/// Handle to the running reader task
pub struct BackgroundReader {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<ReaderExit>>,
}

impl std::fmt::Debug for BackgroundReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundReader")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl BackgroundReader {
    /// Spawn the reader loop on the current tokio runtime
    ///
    /// # Arguments
    ///
    /// * `transport` - Open transport; the reader owns its read side from now on
    /// * `parser` - Line classifier
    /// * `store` - Destination for readings, messages and stats
    /// * `tracker` - Receives read activity and error events
    /// * `poll_timeout` - Bound on each `read_line`, and on how late `stop()` is noticed
    pub fn start(
        transport: Arc<dyn LineTransport>,
        parser: FrameParser,
        store: Arc<TelemetryStore>,
        tracker: Arc<ConnectionTracker>,
        poll_timeout: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let ctx = ReaderContext {
            transport,
            parser,
            store,
            tracker,
            poll_timeout,
        };

        let handle = tokio::spawn(run(ctx, shutdown_rx));
        info!("Background reader started (poll timeout {:?})", poll_timeout);

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Whether the loop is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Ask the loop to exit and wait until it has
    ///
    /// Safe to call after the loop already ended on its own, and more than
    /// once. Once this returns the task is gone and will not touch the store
    /// again. Returns `None` if there was nothing left to join.
    pub async fn stop(&mut self) -> Option<ReaderExit> {
        let _ = self.shutdown.send(true);
        let handle = self.handle.take()?;

        match handle.await {
            Ok(exit) => {
                info!("Background reader stopped ({:?})", exit);
                Some(exit)
            }
            Err(e) => {
                warn!("Background reader ended abnormally: {}", e);
                None
            }
        }
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(true);
            handle.abort();
        }
    }
}

async fn run(ctx: ReaderContext, mut shutdown: watch::Receiver<bool>) -> ReaderExit {
    loop {
        if *shutdown.borrow() {
            return ReaderExit::Stopped;
        }

        // The only suspension point: a bounded read, raced against stop
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => return ReaderExit::Stopped,
            read = ctx.transport.read_line(ctx.poll_timeout) => read,
        };

        match read {
            Ok(None) => continue,
            Ok(Some(line)) => ctx.handle_line(&line),
            Err(e) => {
                error!("Serial read failed, reader exiting: {}", e);
                ctx.store.record_message(SystemMessage::now(
                    MessageLevel::Error,
                    format!("Serial connection lost: {}", e),
                ));
                ctx.tracker.on_error();
                ctx.transport.disconnect().await;
                // Last, so a disconnected tracker implies the rest is visible
                ctx.tracker.on_disconnected();
                return ReaderExit::TransportFailed;
            }
        }
    }
}

impl ReaderContext {
    fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.tracker.on_read_activity();

        let frame = self.parser.parse(line);
        trace!("RX {} frame", frame.kind());

        match frame {
            Frame::SensorReading(reading) => {
                trace!("Sensor {}: {:.2}°C ({})", reading.sensor_id, reading.temperature, reading.status);
                self.store.record_reading(reading);
            }
            Frame::SystemMessage(message) => {
                debug!("Device [{}]: {}", message.level, message.message);
                self.store.record_message(message);
            }
            Frame::Stats(stats) => {
                let summary = format!("Device stats received ({} fields)", stats.fields.len());
                debug!("{}", summary);
                self.store.record_stats(stats);
                self.store.record_message(SystemMessage::now(MessageLevel::Info, summary));
            }
            Frame::Unrecognized { raw, reason } => {
                self.tracker.on_unrecognized();
                debug!("Skipping unrecognized line ({}): {}", reason, raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::health::HealthSettings;
    use crate::serial::port_trait::MockLineTransport;
    use crate::serial::SerialLineTransport;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    const POLL: Duration = Duration::from_millis(20);

    struct Fixture {
        transport: Arc<SerialLineTransport>,
        device: tokio::io::DuplexStream,
        store: Arc<TelemetryStore>,
        tracker: Arc<ConnectionTracker>,
    }

    async fn fixture() -> Fixture {
        let (device, host) = tokio::io::duplex(4096);
        let transport = Arc::new(SerialLineTransport::default());
        transport.attach(host, "loop0").await;
        let tracker = Arc::new(ConnectionTracker::new(HealthSettings::default()));
        tracker.on_connected();
        Fixture {
            transport,
            device,
            store: Arc::new(TelemetryStore::new(50, 10)),
            tracker,
        }
    }

    fn start(f: &Fixture) -> BackgroundReader {
        BackgroundReader::start(
            f.transport.clone(),
            FrameParser::default(),
            f.store.clone(),
            f.tracker.clone(),
            POLL,
        )
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_reading_routed_to_store() {
        let mut f = fixture().await;
        let mut reader = start(&f);

        f.device
            .write_all(b"{\"sensor_id\":2,\"temperature\":-5.3,\"status\":\"ok\"}\n")
            .await
            .unwrap();

        let store = f.store.clone();
        wait_for(|| store.reading_count() == 1).await;

        assert_eq!(f.store.current_temperatures()[&2].temperature, -5.3);
        assert_eq!(f.store.recent_readings(1)[0].sensor_id, 2);
        assert_eq!(f.tracker.counters().total_received, 1);

        assert_eq!(reader.stop().await, Some(ReaderExit::Stopped));
    }

    #[tokio::test]
    async fn test_mixed_lines_are_classified() {
        let mut f = fixture().await;
        let mut reader = start(&f);

        f.device
            .write_all(
                b"System ready\n\
                  {\"sensor_id\":1,\"temperature\":21.0}\n\
                  {\"sensor_id\":1,\"tempera\n\
                  \n\
                  {\"type\":\"stats\",\"uptime_ms\":1000}\n\
                  {\"level\":\"error\",\"message\":\"bus fault\"}\n",
            )
            .await
            .unwrap();

        let tracker = f.tracker.clone();
        wait_for(|| tracker.counters().total_received == 5).await;
        reader.stop().await;

        assert_eq!(f.store.reading_count(), 1);
        assert_eq!(f.tracker.counters().unrecognized, 1);
        assert_eq!(f.store.latest_stats().and_then(|s| s.get_u64("uptime_ms")), Some(1000));

        let messages = f.store.recent_messages(10);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].message, "System ready");
        assert!(messages[1].message.starts_with("Device stats received"));
        assert_eq!(messages[2].level, MessageLevel::Error);
        assert_eq!(messages[2].message, "bus fault");
    }

    #[tokio::test]
    async fn test_stop_while_blocked_in_read() {
        let mut f = fixture().await;
        let mut reader = BackgroundReader::start(
            f.transport.clone(),
            FrameParser::default(),
            f.store.clone(),
            f.tracker.clone(),
            Duration::from_secs(30),
        );

        // Let the loop park inside read_line
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(reader.is_running());

        assert_eq!(reader.stop().await, Some(ReaderExit::Stopped));
        assert!(!reader.is_running());

        f.device
            .write_all(b"{\"sensor_id\":3,\"temperature\":30.0}\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.store.reading_count(), 0, "no store mutation after stop");
        assert_eq!(reader.stop().await, None, "second stop is a no-op");
    }

    #[tokio::test]
    async fn test_fatal_error_ends_loop() {
        let f = fixture().await;
        let mut reader = start(&f);
        drop(f.device);

        let tracker = f.tracker.clone();
        wait_for(|| !tracker.is_connected()).await;

        assert!(!f.tracker.is_healthy());
        assert_eq!(f.tracker.counters().error_count, 1);
        assert!(!f.transport.is_open());

        let last = f.store.recent_messages(1);
        assert_eq!(last[0].level, MessageLevel::Error);
        assert!(last[0].message.contains("Serial connection lost"));

        // Stop after the loop already exited on its own
        assert_eq!(reader.stop().await, Some(ReaderExit::TransportFailed));
    }

    // The mock resolves instantly, so the loop needs its own worker
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_idle_timeouts_keep_polling() {
        let mut mock = MockLineTransport::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        mock.expect_read_line().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        });

        let store = Arc::new(TelemetryStore::new(50, 10));
        let tracker = Arc::new(ConnectionTracker::default());
        let mut reader = BackgroundReader::start(Arc::new(mock), FrameParser::default(), store.clone(), tracker.clone(), POLL);

        let seen = polls.clone();
        wait_for(|| seen.load(Ordering::SeqCst) >= 5).await;
        assert!(reader.is_running());
        assert_eq!(reader.stop().await, Some(ReaderExit::Stopped));
        assert_eq!(tracker.counters().error_count, 0);
        assert!(store.recent_messages(10).is_empty());
    }

    #[tokio::test]
    async fn test_mock_error_disconnects_transport() {
        let store = Arc::new(TelemetryStore::new(50, 10));
        let tracker = Arc::new(ConnectionTracker::default());
        tracker.on_connected();

        // State seen by the transport while it is being closed
        let seen = Arc::new(parking_lot::Mutex::new(None));

        let mut mock = MockLineTransport::new();
        mock.expect_read_line()
            .times(1)
            .returning(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        {
            let (store, tracker, seen) = (store.clone(), tracker.clone(), seen.clone());
            mock.expect_disconnect().times(1).returning(move || {
                *seen.lock() = Some((
                    store.recent_messages(1).len(),
                    tracker.counters().error_count,
                    tracker.is_connected(),
                ));
            });
        }

        let mut reader = BackgroundReader::start(Arc::new(mock), FrameParser::default(), store.clone(), tracker.clone(), POLL);

        let watched = tracker.clone();
        wait_for(|| !watched.is_connected()).await;

        // Message and error count land before the link reads as disconnected
        assert_eq!(*seen.lock(), Some((1, 1, true)));
        let last = store.recent_messages(1);
        assert!(last[0].message.contains("unplugged"));
        assert_eq!(tracker.counters().error_count, 1);

        assert_eq!(reader.stop().await, Some(ReaderExit::TransportFailed));
    }
}
