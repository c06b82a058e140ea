//! Polling waits for conditions over live session state.
//!
//! Assertions over the request log are evaluated against traffic that may
//! still be in flight, so they poll until the condition produces a value or
//! the timeout expires. The interval is fixed; the log is in-memory and cheap
//! to re-read.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Default timeout for log assertions (5 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default poll interval for re-evaluating conditions (25ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Configuration for wait operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Maximum time to wait for the condition.
    pub timeout: Duration,

    /// How often to check if the condition is satisfied.
    pub poll_interval: Duration,
}

impl WaitConfig {
    /// Creates a new wait configuration.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Creates a config with custom timeout and default poll interval.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    /// A config that evaluates exactly once.
    #[must_use]
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, DEFAULT_POLL_INTERVAL)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Polls `probe` until it yields `Some`, or returns `None` after the timeout.
///
/// The probe always runs at least once, so a zero timeout means "check now".
pub async fn wait_for_some<F, Fut, T>(probe: F, config: WaitConfig) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }

        if start.elapsed() >= config.timeout {
            return None;
        }

        sleep(config.poll_interval).await;
    }
}
