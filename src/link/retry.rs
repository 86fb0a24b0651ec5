//! # Connect Retry
//!
//! Bounded retry for callers that want the link back after a failure.
//! The connection never reconnects by itself; this is the opt-in helper.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::Connection;
use crate::config::ReconnectConfig;

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up, at least 1
    pub max_attempts: u32,
    /// Pause between attempts; not applied after the last one
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.retry_delay_ms))
    }
}

/// Run `attempt` until it returns true or the policy is exhausted
///
/// `attempt` receives the 1-based attempt number. Returns the number of the
/// successful attempt.
pub async fn retry<F, Fut>(policy: RetryPolicy, mut attempt: F) -> Option<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    for n in 1..=policy.max_attempts {
        if attempt(n).await {
            return Some(n);
        }
        if n < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    None
}

/// Connect to `port` and start the reader, retrying per `policy`
///
/// A connect whose reader fails to start is undone before the next attempt.
///
/// # Returns
///
/// `true` once connected with the reader running, `false` after the last
/// failed attempt
pub async fn connect_with_retry(connection: &Connection, port: &str, policy: RetryPolicy) -> bool {
    let outcome = retry(policy, |n| async move {
        info!("Connecting to {} (attempt {}/{})", port, n, policy.max_attempts);

        if !connection.connect(port).await {
            return false;
        }
        if connection.start_reading().await {
            return true;
        }

        warn!("Reader failed to start on {}, disconnecting", port);
        connection.disconnect().await;
        false
    })
    .await;

    match outcome {
        Some(n) => {
            info!("Link to {} up after {} attempt(s)", port, n);
            true
        }
        None => {
            warn!("Giving up on {} after {} attempt(s)", port, policy.max_attempts);
            false
        }
    }
}
