//! Request descriptors and finalized request records.
//!
//! A [`RequestDescriptor`] is what the driver reports when a request is
//! dispatched. A [`RequestRecord`] is the immutable snapshot appended to the
//! [`crate::RequestLog`] once the request reaches a terminal state: a real
//! response, a mock fulfillment, or a failure.

use crate::matcher::{parse_query, QueryParams};
use crate::mock::MockResponse;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header map. Insertion order is preserved so serialized comparisons are stable.
pub type Headers = IndexMap<String, String>;

/// Driver-assigned identifier correlating dispatch and completion events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps a driver identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An outgoing request as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Full request URL, including query string.
    pub url: String,
    /// Upper-cased HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body, if any.
    pub post_body: Option<String>,
    /// Driver resource type (e.g. `Document`, `XHR`, `Fetch`).
    pub resource_type: String,
}

impl RequestDescriptor {
    /// Creates a descriptor. The method is normalized to upper case.
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.to_ascii_uppercase(),
            headers: Headers::new(),
            post_body: None,
            resource_type: "Other".to_string(),
        }
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_post_body(mut self, body: impl Into<String>) -> Self {
        self.post_body = Some(body.into());
        self
    }

    /// Sets the resource type.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Parsed query parameters of the request URL.
    #[must_use]
    pub fn query(&self) -> QueryParams {
        parse_query(&self.url)
    }
}

/// A real response observed for a forwarded request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObservedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body decoded as text, if it was retrieved.
    pub body: Option<String>,
    /// Whether the browser served the response from its cache.
    pub from_cache: bool,
}

impl ObservedResponse {
    /// Creates a response with the given status and no headers or body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Marks the response as served from cache.
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

/// Immutable snapshot of one completed request/response pair.
///
/// Records are only created by the interception controller and are shared as
/// `Arc<RequestRecord>`, so once appended to the log they never change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    /// Full request URL.
    pub url: String,
    /// Upper-cased HTTP method.
    pub method: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body, if any.
    pub post_body: Option<String>,
    /// Response status; 0 when the request failed before a response.
    pub response_status: u16,
    /// Response headers.
    pub response_headers: Headers,
    /// Response body, if known.
    pub response_body: Option<String>,
    /// Whether the response came from the browser cache.
    pub from_cache: bool,
    /// Driver resource type.
    pub resource_type: String,
    /// True exactly when the status is 2xx.
    pub ok: bool,
    /// Position in completion order within the session's log.
    pub sequence_index: u64,
    /// True when a mock rule served the response.
    pub mocked: bool,
    /// Driver error text when the request failed.
    pub failure: Option<String>,
}

impl RequestRecord {
    fn base(request: &RequestDescriptor) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            post_body: request.post_body.clone(),
            response_status: 0,
            response_headers: Headers::new(),
            response_body: None,
            from_cache: false,
            resource_type: request.resource_type.clone(),
            ok: false,
            sequence_index: 0,
            mocked: false,
            failure: None,
        }
    }

    pub(crate) fn from_response(request: &RequestDescriptor, response: ObservedResponse) -> Self {
        Self {
            response_status: response.status,
            ok: is_success(response.status),
            response_headers: response.headers,
            response_body: response.body,
            from_cache: response.from_cache,
            ..Self::base(request)
        }
    }

    pub(crate) fn from_mock(request: &RequestDescriptor, response: &MockResponse) -> Self {
        Self {
            response_status: response.status,
            ok: is_success(response.status),
            response_headers: response.headers.clone(),
            response_body: response.body.clone(),
            mocked: true,
            ..Self::base(request)
        }
    }

    pub(crate) fn from_failure(request: &RequestDescriptor, reason: impl Into<String>, mocked: bool) -> Self {
        Self {
            failure: Some(reason.into()),
            mocked,
            ..Self::base(request)
        }
    }

    /// Looks up a response header by case-insensitive name.
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_normalizes_method() {
        let request = RequestDescriptor::new("post", "http://h/api?a=1");
        assert_eq!(request.method, "POST");
        assert_eq!(request.query().get("a").map(String::as_str), Some("1"));
    }

    #[test]
    fn record_from_response_sets_ok() {
        let request = RequestDescriptor::new("GET", "http://h/");
        let ok = RequestRecord::from_response(&request, ObservedResponse::new(204));
        assert!(ok.ok);
        assert!(!ok.mocked);

        let not_found = RequestRecord::from_response(&request, ObservedResponse::new(404));
        assert!(!not_found.ok);

        let failed = RequestRecord::from_failure(&request, "net::ERR_FAILED", false);
        assert_eq!(failed.response_status, 0);
        assert!(!failed.ok);
        assert_eq!(failed.failure.as_deref(), Some("net::ERR_FAILED"));
    }

    #[test]
    fn response_header_lookup_ignores_case() {
        let request = RequestDescriptor::new("GET", "http://h/");
        let record = RequestRecord::from_response(
            &request,
            ObservedResponse::new(200).with_header("Content-Type", "text/html"),
        );
        assert_eq!(record.response_header("content-type"), Some("text/html"));
        assert_eq!(record.response_header("x-missing"), None);
    }
}
