//! [`RequestDriver`] over a Chrome page via the DevTools `Fetch` domain.
//!
//! Every request is paused twice: once before it is sent (the request stage)
//! and, if the engine forwards it, once more when the response headers arrive
//! (the response stage). Request-stage pauses become
//! [`DriverEvent::Dispatched`]; response-stage pauses are read, released
//! immediately and reported as [`DriverEvent::Responded`] or
//! [`DriverEvent::Failed`].
//!
//! Requests are correlated across stages by their network id, which Chrome
//! keeps stable while the per-pause fetch id changes.
//!
//! The `Fetch` domain does not say whether a response came from the browser
//! cache, so records produced by this driver always have `from_cache` false.

use crate::driver::{DriverEvent, DriverEvents, RequestDriver};
use crate::error::{NetmockError, Result};
use crate::mock::MockResponse;
use crate::record::{Headers, ObservedResponse, RequestDescriptor, RequestId};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, DisableParams, EnableParams, EventRequestPaused, FailRequestParams,
    FulfillRequestParams, GetResponseBodyParams, HeaderEntry, RequestId as FetchRequestId,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, GetRequestPostDataParams};
use chromiumoxide::page::Page as ChromePage;
use chromiumoxide::types::Binary;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fetch ids of request-stage pauses awaiting the engine's decision.
type PausedRequests = Arc<Mutex<HashMap<RequestId, FetchRequestId>>>;

/// Intercepts a chromiumoxide page.
///
/// Interception stays enabled until the session closes and calls
/// [`RequestDriver::detach`]. Responses are never reported as cached.
///
/// # Example
///
/// ```ignore
/// let page = Arc::new(browser.new_page("about:blank").await?);
/// let (driver, events) = ChromiumDriver::attach(page.clone()).await?;
/// let session = InterceptSession::start(driver, events, &InterceptConfig::default())?;
/// page.goto("http://localhost:3000").await?;
/// ```
#[derive(Debug)]
pub struct ChromiumDriver {
    page: Arc<ChromePage>,
    paused: PausedRequests,
    listener: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Enables request interception on `page` and starts listening.
    ///
    /// # Errors
    ///
    /// Returns a [`NetmockError::ChromiumOxide`] error if the `Fetch` domain
    /// cannot be enabled or its events cannot be subscribed to.
    pub async fn attach(page: Arc<ChromePage>) -> Result<(Self, DriverEvents)> {
        let mut paused_events = page.event_listener::<EventRequestPaused>().await?;

        let patterns = [RequestStage::Request, RequestStage::Response]
            .into_iter()
            .map(|stage| RequestPattern {
                url_pattern: Some("*".to_string()),
                resource_type: None,
                request_stage: Some(stage),
            })
            .collect();
        page.execute(EnableParams {
            patterns: Some(patterns),
            handle_auth_requests: None,
        })
        .await?;
        debug!("fetch interception enabled");

        let (tx, rx) = mpsc::unbounded_channel();
        let paused: PausedRequests = Arc::new(Mutex::new(HashMap::new()));

        let listener = {
            let page = page.clone();
            let paused = paused.clone();
            tokio::spawn(async move {
                while let Some(event) = paused_events.next().await {
                    let event = translate(&page, &paused, &event).await;
                    if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                        release_unrouted(&page, &paused, &event).await;
                    }
                }
            })
        };

        Ok((
            Self {
                page,
                paused,
                listener,
            },
            rx,
        ))
    }

    fn take_paused(&self, id: &RequestId, operation: &'static str) -> Result<FetchRequestId> {
        self.paused.lock().remove(id).ok_or_else(|| NetmockError::Driver {
            operation,
            reason: format!("request {id} is not paused"),
        })
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl RequestDriver for ChromiumDriver {
    async fn continue_request(&self, id: &RequestId) -> Result<()> {
        let fetch_id = self.take_paused(id, "continue")?;
        self.page
            .execute(ContinueRequestParams::new(fetch_id))
            .await
            .map_err(|e| driver_error("continue", &e))?;
        Ok(())
    }

    async fn fulfill_request(&self, id: &RequestId, response: &MockResponse) -> Result<()> {
        let fetch_id = self.take_paused(id, "fulfill")?;

        let mut params = FulfillRequestParams::new(fetch_id, i64::from(response.status));
        params.response_headers = Some(
            response
                .headers
                .iter()
                .map(|(name, value)| HeaderEntry::new(name.clone(), value.clone()))
                .collect(),
        );
        params.body = response
            .body
            .as_ref()
            .map(|body| Binary::from(STANDARD.encode(body)));

        self.page
            .execute(params)
            .await
            .map_err(|e| driver_error("fulfill", &e))?;
        Ok(())
    }

    async fn abort_request(&self, id: &RequestId) -> Result<()> {
        let fetch_id = self.take_paused(id, "abort")?;
        self.page
            .execute(FailRequestParams::new(fetch_id, ErrorReason::Aborted))
            .await
            .map_err(|e| driver_error("abort", &e))?;
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        // Disable first so nothing new is paused while the leftovers drain.
        let disabled = self.page.execute(DisableParams::default()).await;

        let leftover: Vec<_> = self.paused.lock().drain().collect();
        for (id, fetch_id) in leftover {
            if let Err(e) = self.page.execute(ContinueRequestParams::new(fetch_id)).await {
                debug!(id = %id, "failed to release paused request on detach: {}", e);
            }
        }

        disabled.map_err(|e| driver_error("detach", &e))?;
        debug!("fetch interception disabled");
        Ok(())
    }
}

/// Lets a request the engine will never see proceed to the network.
async fn release_unrouted(page: &ChromePage, paused: &PausedRequests, event: &DriverEvent) {
    let DriverEvent::Dispatched { id, .. } = event else {
        return;
    };
    let Some(fetch_id) = paused.lock().remove(id) else {
        return;
    };
    debug!(id = %id, "interception session gone; releasing request");
    if let Err(e) = page.execute(ContinueRequestParams::new(fetch_id)).await {
        debug!(id = %id, "failed to release unrouted request: {}", e);
    }
}

fn driver_error(operation: &'static str, error: &chromiumoxide::error::CdpError) -> NetmockError {
    NetmockError::Driver {
        operation,
        reason: error.to_string(),
    }
}

/// Maps one paused event to a driver event, releasing response-stage pauses.
async fn translate(page: &ChromePage, paused: &PausedRequests, event: &EventRequestPaused) -> DriverEvent {
    let id = RequestId::new(
        event
            .network_id
            .as_ref()
            .map_or_else(|| event.request_id.inner().clone(), |id| id.inner().clone()),
    );

    if let Some(error_reason) = event.response_error_reason.clone() {
        let reason = AsRef::<str>::as_ref(&error_reason).to_string();
        if let Err(e) = page
            .execute(FailRequestParams::new(event.request_id.clone(), error_reason))
            .await
        {
            debug!(id = %id, "failed to release errored response: {}", e);
        }
        return DriverEvent::Failed { id, reason };
    }

    let Some(status) = event.response_status_code else {
        paused.lock().insert(id.clone(), event.request_id.clone());
        let mut request = describe_request(event);
        request.post_body = read_post_body(page, event).await;
        return DriverEvent::Dispatched { id, request };
    };

    let body = read_body(page, event).await;
    if let Err(e) = page
        .execute(ContinueRequestParams::new(event.request_id.clone()))
        .await
    {
        warn!(id = %id, "failed to release response: {}", e);
    }

    let mut response = ObservedResponse::new(u16::try_from(status).unwrap_or_default());
    for header in event.response_headers.iter().flatten() {
        response = response.with_header(header.name.clone(), header.value.clone());
    }
    if let Some(body) = body {
        response = response.with_body(body);
    }
    DriverEvent::Responded { id, response }
}

fn describe_request(event: &EventRequestPaused) -> RequestDescriptor {
    let request = &event.request;
    let mut headers = Headers::new();
    if let Some(map) = request.headers.inner().as_object() {
        for (name, value) in map {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            headers.insert(name.clone(), value);
        }
    }

    let resource_type: &str = event.resource_type.as_ref();
    let mut descriptor = RequestDescriptor::new(&request.method, request.url.clone())
        .with_resource_type(resource_type);
    descriptor.headers = headers;
    descriptor
}

/// Reads a paused request's body from its inline entries, or from the
/// network domain when Chrome left them out.
async fn read_post_body(page: &ChromePage, event: &EventRequestPaused) -> Option<String> {
    let request = &event.request;
    if let Some(entries) = &request.post_data_entries {
        let mut bytes = Vec::new();
        let mut inline = false;
        for entry in entries {
            let Some(chunk) = &entry.bytes else { continue };
            inline = true;
            match STANDARD.decode(AsRef::<str>::as_ref(chunk)) {
                Ok(decoded) => bytes.extend_from_slice(&decoded),
                Err(e) => {
                    warn!(url = %request.url, "request body entry is not valid base64: {}", e);
                    return None;
                }
            }
        }
        if inline {
            return Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }

    if request.has_post_data != Some(true) {
        return None;
    }
    let network_id = event.network_id.clone()?;
    match page.execute(GetRequestPostDataParams::new(network_id)).await {
        Ok(response) => Some(response.result.post_data),
        Err(e) => {
            debug!(url = %request.url, "request body not retrievable: {}", e);
            None
        }
    }
}

/// Reads a paused response's body; redirects and empty responses have none.
async fn read_body(page: &ChromePage, event: &EventRequestPaused) -> Option<String> {
    let returns = match page
        .execute(GetResponseBodyParams::new(event.request_id.clone()))
        .await
    {
        Ok(response) => response.result,
        Err(e) => {
            debug!(url = %event.request.url, "no response body available: {}", e);
            return None;
        }
    };

    if !returns.base64_encoded {
        return Some(returns.body);
    }
    match STANDARD.decode(returns.body.as_bytes()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!(url = %event.request.url, "response body is not valid base64: {}", e);
            None
        }
    }
}
