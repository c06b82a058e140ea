//! The seam between the interception engine and a browser driver.
//!
//! The engine never talks to a browser directly. A driver reports request
//! lifecycle events over a channel and exposes three primitives for a paused
//! request: continue it to the network, fulfill it locally, or abort it.
//! When the session ends the driver is detached.
//! [`crate::chromium::ChromiumDriver`] implements this over the DevTools
//! protocol; [`crate::scripted::ScriptedDriver`] implements it in memory.

use crate::error::Result;
use crate::mock::MockResponse;
use crate::record::{ObservedResponse, RequestDescriptor, RequestId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A request lifecycle event reported by the driver.
///
/// Events for one request share its [`RequestId`]. `Responded` and `Failed`
/// are only expected for requests the engine forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The page issued a request; it is paused until the engine decides.
    Dispatched {
        /// Correlation id
        id: RequestId,
        /// What was requested
        request: RequestDescriptor,
    },
    /// A forwarded request received its response.
    Responded {
        /// Correlation id
        id: RequestId,
        /// The observed response
        response: ObservedResponse,
    },
    /// A forwarded request failed before completing.
    Failed {
        /// Correlation id
        id: RequestId,
        /// Driver error text, e.g. `net::ERR_CONNECTION_REFUSED`
        reason: String,
    },
}

/// Receiving half of a driver's event stream.
pub type DriverEvents = mpsc::UnboundedReceiver<DriverEvent>;

/// Primitives the engine needs from a browser driver for a paused request.
///
/// Implementations must be cheap to call concurrently: delayed and manual
/// mocks fulfill from their own tasks.
#[async_trait]
pub trait RequestDriver: Send + Sync + 'static {
    /// Lets the request proceed to the network unmodified.
    async fn continue_request(&self, id: &RequestId) -> Result<()>;

    /// Answers the request locally with `response`.
    async fn fulfill_request(&self, id: &RequestId, response: &MockResponse) -> Result<()>;

    /// Aborts the request.
    async fn abort_request(&self, id: &RequestId) -> Result<()>;

    /// Stops intercepting and releases anything still paused.
    ///
    /// Called once when the session's event loop stops. The default does
    /// nothing.
    async fn detach(&self) -> Result<()> {
        Ok(())
    }
}
