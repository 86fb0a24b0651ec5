//! Trait abstraction for the line transport so the link can be tested
//! without hardware

use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Line-oriented byte transport to the sensor board
///
/// States are Closed and Open. `connect` moves Closed to Open; `disconnect`
/// or a fatal I/O error moves back to Closed. Reconnecting is always a fresh
/// `connect`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Open `port_name`; false on not-found, busy, permission or timeout
    async fn connect(&self, port_name: &str, baud_rate: u32) -> bool;

    /// Close the handle; a no-op when already closed
    async fn disconnect(&self);

    /// Wait up to `timeout` for one line
    ///
    /// `Ok(None)` means nothing complete arrived in time. The line comes back
    /// without its terminator and with invalid UTF-8 replaced. `Err` is only
    /// returned for fatal I/O, after which the transport is Closed.
    async fn read_line(&self, timeout: Duration) -> io::Result<Option<String>>;

    /// Write `text` followed by a newline; false if closed or the write fails
    async fn write_line(&self, text: &str) -> bool;

    fn is_open(&self) -> bool;

    /// Most recent connect or I/O failure
    fn last_error(&self) -> Option<String>;

    /// Port of the current or most recent connection
    fn port_name(&self) -> Option<String>;
}
