//! Loopback transport for link tests without hardware

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;

use thermo_link::serial::{LineTransport, SerialLineTransport};
use thermo_link::{Config, Connection};

pub const PORT: &str = "/dev/loop-sensor";

/// Serial transport whose `connect` succeeds only after `plug()`
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inner: SerialLineTransport,
    pending: Mutex<Option<DuplexStream>>,
}

impl LoopbackTransport {
    /// Prepare a board for the next `connect`; returns the board's end
    pub fn plug(&self) -> DuplexStream {
        let (device, host) = tokio::io::duplex(64 * 1024);
        *self.pending.lock() = Some(host);
        device
    }
}

#[async_trait]
impl LineTransport for LoopbackTransport {
    async fn connect(&self, port_name: &str, _baud_rate: u32) -> bool {
        let host = self.pending.lock().take();
        match host {
            Some(host) => {
                self.inner.attach(host, port_name).await;
                true
            }
            None => false,
        }
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    async fn read_line(&self, timeout: Duration) -> io::Result<Option<String>> {
        self.inner.read_line(timeout).await
    }

    async fn write_line(&self, text: &str) -> bool {
        self.inner.write_line(text).await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn last_error(&self) -> Option<String> {
        self.inner.last_error()
    }

    fn port_name(&self) -> Option<String> {
        self.inner.port_name()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.serial.read_timeout_ms = 20;
    config
}

pub fn connection_with(config: Config) -> (Connection, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::default());
    let connection = Connection::with_transport(config, transport.clone());
    (connection, transport)
}

/// Poll `cond` for up to two seconds
pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
