//! An in-memory driver for exercising sessions without a browser.
//!
//! [`ScriptedDriver`] plays the browser's side of the seam: test code
//! dispatches requests and reports responses or failures, and the driver
//! records every continue/fulfill/abort call the engine makes.

use crate::driver::{DriverEvent, DriverEvents, RequestDriver};
use crate::error::{NetmockError, Result};
use crate::mock::MockResponse;
use crate::record::{ObservedResponse, RequestDescriptor, RequestId};
use crate::wait::{wait_for_some, WaitConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A primitive the engine invoked on the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    /// `continue_request`
    Continue(RequestId),
    /// `fulfill_request`
    Fulfill(RequestId, MockResponse),
    /// `abort_request`
    Abort(RequestId),
}

impl DriverCall {
    /// The request this call targeted.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Continue(id) | Self::Fulfill(id, _) | Self::Abort(id) => id,
        }
    }
}

/// Scriptable in-memory driver.
///
/// Cheaply cloneable; clones share the call log and event channel.
///
/// # Example
///
/// ```ignore
/// let (driver, events) = ScriptedDriver::new();
/// let session = InterceptSession::start(driver.clone(), events, &InterceptConfig::default())?;
/// let id = driver.dispatch(RequestDescriptor::new("GET", "http://localhost/api"));
/// let response = driver.wait_for_fulfillment(&id).await;
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedDriver {
    events: mpsc::UnboundedSender<DriverEvent>,
    calls: Arc<Mutex<Vec<DriverCall>>>,
    next_id: Arc<AtomicU64>,
    refuse_fulfill: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
}

impl ScriptedDriver {
    /// Creates a driver and the event stream to hand to a session.
    #[must_use]
    pub fn new() -> (Self, DriverEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let driver = Self {
            events,
            calls: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            refuse_fulfill: Arc::new(AtomicBool::new(false)),
            detached: Arc::new(AtomicBool::new(false)),
        };
        (driver, rx)
    }

    fn emit(&self, event: DriverEvent) {
        // The session may already be closed; events are dropped like a real page's.
        let _ = self.events.send(event);
    }

    /// Issues a request from the "page" and returns its id.
    pub fn dispatch(&self, request: RequestDescriptor) -> RequestId {
        let id = RequestId::new(format!("req-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.emit(DriverEvent::Dispatched {
            id: id.clone(),
            request,
        });
        id
    }

    /// Reports a network response for a forwarded request.
    pub fn respond(&self, id: &RequestId, response: ObservedResponse) {
        self.emit(DriverEvent::Responded {
            id: id.clone(),
            response,
        });
    }

    /// Reports a network failure for a forwarded request.
    pub fn fail(&self, id: &RequestId, reason: impl Into<String>) {
        self.emit(DriverEvent::Failed {
            id: id.clone(),
            reason: reason.into(),
        });
    }

    /// Makes subsequent `fulfill_request` calls fail, as a crashed page would.
    pub fn refuse_fulfillments(&self, refuse: bool) {
        self.refuse_fulfill.store(refuse, Ordering::SeqCst);
    }

    /// Returns true once the engine has detached from this driver.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Every call the engine made, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Calls made for one request.
    #[must_use]
    pub fn calls_for(&self, id: &RequestId) -> Vec<DriverCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.id() == id)
            .cloned()
            .collect()
    }

    /// Waits until the engine makes any call for `id`.
    pub async fn wait_for_call(&self, id: &RequestId, wait: WaitConfig) -> Option<DriverCall> {
        wait_for_some(
            || {
                let call = self.calls_for(id).into_iter().next();
                async move { call }
            },
            wait,
        )
        .await
    }

    /// Waits until `id` is fulfilled and returns the mock response.
    pub async fn wait_for_fulfillment(&self, id: &RequestId) -> Option<MockResponse> {
        match self.wait_for_call(id, WaitConfig::default()).await {
            Some(DriverCall::Fulfill(_, response)) => Some(response),
            _ => None,
        }
    }
}

#[async_trait]
impl RequestDriver for ScriptedDriver {
    async fn continue_request(&self, id: &RequestId) -> Result<()> {
        self.calls.lock().push(DriverCall::Continue(id.clone()));
        Ok(())
    }

    async fn fulfill_request(&self, id: &RequestId, response: &MockResponse) -> Result<()> {
        if self.refuse_fulfill.load(Ordering::SeqCst) {
            return Err(NetmockError::Driver {
                operation: "fulfill",
                reason: "target closed".to_string(),
            });
        }
        self.calls
            .lock()
            .push(DriverCall::Fulfill(id.clone(), response.clone()));
        Ok(())
    }

    async fn abort_request(&self, id: &RequestId) -> Result<()> {
        self.calls.lock().push(DriverCall::Abort(id.clone()));
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}
