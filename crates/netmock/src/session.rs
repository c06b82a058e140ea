//! The per-session context object.
//!
//! An [`InterceptSession`] owns exactly one controller, one mock registry and
//! one request log. Nothing is global: two sessions on two pages never see
//! each other's mocks or records.
//!
//! # Resource Safety
//!
//! `InterceptSession` implements Drop to stop the controller and discard held
//! requests even if a test panics. Explicit cleanup via `close()` is preferred
//! because it also waits for the event loop to finish.

use crate::assertion::AssertionFilterChain;
use crate::config::InterceptConfig;
use crate::controller::InterceptionController;
use crate::driver::{DriverEvents, RequestDriver};
use crate::error::{NetmockError, Result};
use crate::log::RequestLog;
use crate::matcher::UrlPattern;
use crate::mock::{MockHandle, MockOptions};
use crate::registry::MockRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One interception session bound to one driver.
///
/// # Example
///
/// ```ignore
/// let (driver, events) = ChromiumDriver::attach(page).await?;
/// let session = InterceptSession::start(driver, events, &InterceptConfig::default())?;
///
/// let users = session.register_mock("/api/users", MockOptions::new().with_body(json!([])))?;
/// // ... drive the page ...
/// users.called()?;
/// session.log().filter().method("GET").status(200).await?;
///
/// session.close().await?;
/// ```
pub struct InterceptSession {
    registry: Arc<MockRegistry>,
    log: RequestLog,
    controller: InterceptionController,
    closed: AtomicBool,
}

impl InterceptSession {
    /// Starts intercepting `events` from `driver`.
    ///
    /// Mocks declared in `config.mocks` are registered before the first event
    /// is processed. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a programming error if a declared mock is invalid; nothing is
    /// started in that case.
    pub fn start<D: RequestDriver>(driver: D, events: DriverEvents, config: &InterceptConfig) -> Result<Self> {
        let registry = Arc::new(MockRegistry::new(config.mock_defaults()));
        for definition in &config.mocks {
            let (pattern, options) = definition.clone().into_parts()?;
            registry.register(pattern, options)?;
        }

        let log = RequestLog::new(config.wait_config());
        let controller = InterceptionController::start(Arc::new(driver), registry.clone(), log.clone(), events);

        info!(
            mocks = registry.len(),
            wait_timeout_ms = config.wait_timeout_ms,
            "interception session started"
        );

        Ok(Self {
            registry,
            log,
            controller,
            closed: AtomicBool::new(false),
        })
    }

    /// Registers a mock, replacing any mock with the same URL, method and
    /// query constraint.
    ///
    /// # Errors
    ///
    /// Returns a programming error for invalid options and
    /// [`NetmockError::SessionClosed`] after `close()`.
    pub fn register_mock(&self, pattern: impl Into<UrlPattern>, options: MockOptions) -> Result<MockHandle> {
        self.ensure_open()?;
        let rule = self.registry.register(pattern, options)?;
        Ok(MockHandle::new(rule))
    }

    /// Removes mocks for `pattern`; see [`MockRegistry::remove`].
    ///
    /// Returns the number of mocks removed.
    pub fn remove_mock(&self, pattern: impl Into<UrlPattern>, options: Option<&MockOptions>) -> usize {
        self.registry.remove(pattern, options)
    }

    /// Removes every mock.
    pub fn clear_mocks(&self) {
        self.registry.clear();
    }

    /// The session's request log.
    #[must_use]
    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    /// Shorthand for `self.log().filter()`.
    #[must_use]
    pub fn filter(&self) -> AssertionFilterChain {
        self.log.filter()
    }

    /// The session's mock registry.
    #[must_use]
    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    /// Returns true once `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tears the session down.
    ///
    /// Held manual requests are aborted without being recorded, waiting
    /// triggers settle with [`NetmockError::SessionClosed`], and the event loop
    /// is awaited. The log stays readable; registering mocks fails afterwards.
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// This currently always succeeds.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(pending = self.pending(), "closing interception session");
        self.controller.shutdown().await;
        info!(recorded = self.log.len(), "interception session closed");
        Ok(())
    }

    fn pending(&self) -> usize {
        self.registry.rules().iter().map(|rule| rule.pending()).sum()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(NetmockError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for InterceptSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptSession")
            .field("closed", &self.is_closed())
            .field("mocks", &self.registry.len())
            .field("recorded", &self.log.len())
            .finish()
    }
}

impl Drop for InterceptSession {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        // Drop cannot await the event loop; signalling is enough to settle
        // held requests and waiting triggers.
        warn!("InterceptSession dropped without explicit close() - signalling shutdown via Drop");
        self.controller.signal_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockDefinition;
    use crate::scripted::ScriptedDriver;
    use serde_json::json;

    #[tokio::test]
    async fn declared_mocks_are_registered_at_start() {
        let mut config = InterceptConfig::default();
        config.mocks.push(
            serde_json::from_value::<MockDefinition>(json!({"url": "/health", "body": "ok"})).unwrap(),
        );

        let (driver, events) = ScriptedDriver::new();
        let session = InterceptSession::start(driver, events, &config).unwrap();
        assert_eq!(session.registry().len(), 1);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_declared_mock_fails_start() {
        let mut config = InterceptConfig::default();
        config.mocks.push(
            serde_json::from_value::<MockDefinition>(json!({"url": "/a", "status": 42})).unwrap(),
        );

        let (driver, events) = ScriptedDriver::new();
        let result = InterceptSession::start(driver, events, &config);
        assert!(matches!(result, Err(NetmockError::Programming(_))));
    }

    #[tokio::test]
    async fn drop_without_close_stops_the_controller() {
        let (driver, events) = ScriptedDriver::new();
        let session = InterceptSession::start(driver, events, &InterceptConfig::default()).unwrap();
        let handle = session
            .register_mock("/slow", MockOptions::new().manual())
            .unwrap();

        drop(session);

        assert!(matches!(handle.trigger().await, Err(NetmockError::SessionClosed)));
    }
}
