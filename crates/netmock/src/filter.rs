//! Immutable, chainable filters over recorded requests.
//!
//! A [`FilterView`] is a snapshot: each predicate call returns a new view over
//! the intersection of the parent's records and that predicate. Nothing here
//! mutates the parent view or the log, so composing the same predicates over
//! the same records always yields the same result.

use crate::matcher::{serialized_eq, Expected, TextMatch};
use crate::record::RequestRecord;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A single filter criterion over a [`RequestRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Request URL.
    Url(TextMatch),
    /// HTTP method, compared like any other text. Recorded methods are
    /// upper-case; [`Predicate::method`] upper-cases exact expectations.
    Method(TextMatch),
    /// Driver resource type.
    ResourceType(TextMatch),
    /// Response status code.
    Status(u16),
    /// Served from the browser cache.
    FromCache(bool),
    /// Full response header set, compared as serialized JSON.
    ResponseHeaders(Value),
    /// One response header, looked up case-insensitively.
    ResponseHeader {
        /// Header name
        name: String,
        /// Expected header value
        expected: TextMatch,
    },
    /// 2xx status.
    Ok(bool),
    /// Request body.
    PostBody(Expected),
    /// Response body.
    ResponseBody(Expected),
    /// Served by a mock rule.
    Mocked(bool),
}

impl Predicate {
    /// Method predicate with exact expectations upper-cased.
    #[must_use]
    pub fn method(expected: impl Into<TextMatch>) -> Self {
        match expected.into() {
            TextMatch::Exact(method) => Self::Method(TextMatch::Exact(method.to_ascii_uppercase())),
            pattern => Self::Method(pattern),
        }
    }

    /// Tests a record against this predicate.
    #[must_use]
    pub fn matches(&self, record: &RequestRecord) -> bool {
        match self {
            Self::Url(expected) => expected.matches(&record.url),
            Self::Method(expected) => expected.matches(&record.method),
            Self::ResourceType(expected) => expected.matches(&record.resource_type),
            Self::Status(status) => record.response_status == *status,
            Self::FromCache(cached) => record.from_cache == *cached,
            Self::ResponseHeaders(expected) => serde_json::to_string(&record.response_headers)
                .is_ok_and(|actual| serialized_eq(expected, &actual)),
            Self::ResponseHeader { name, expected } => record
                .response_header(name)
                .is_some_and(|value| expected.matches(value)),
            Self::Ok(ok) => record.ok == *ok,
            Self::PostBody(expected) => expected.matches_body(record.post_body.as_deref()),
            Self::ResponseBody(expected) => expected.matches_body(record.response_body.as_deref()),
            Self::Mocked(mocked) => record.mocked == *mocked,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(expected) => write!(f, "url {expected}"),
            Self::Method(expected) => write!(f, "method {expected}"),
            Self::ResourceType(expected) => write!(f, "resource type {expected}"),
            Self::Status(status) => write!(f, "status {status}"),
            Self::FromCache(cached) => write!(f, "from cache = {cached}"),
            Self::ResponseHeaders(expected) => write!(f, "response headers {expected}"),
            Self::ResponseHeader { name, expected } => write!(f, "response header {name} {expected}"),
            Self::Ok(ok) => write!(f, "ok = {ok}"),
            Self::PostBody(expected) => write!(f, "post body {expected}"),
            Self::ResponseBody(expected) => write!(f, "response body {expected}"),
            Self::Mocked(mocked) => write!(f, "mocked = {mocked}"),
        }
    }
}

/// An immutable view over an ordered set of request records.
///
/// # Example
///
/// ```ignore
/// let view = session.log().view().status(200).method("POST");
/// assert!(view.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterView {
    records: Arc<[Arc<RequestRecord>]>,
}

impl FilterView {
    pub(crate) fn from_records(records: Vec<Arc<RequestRecord>>) -> Self {
        Self {
            records: records.into(),
        }
    }

    /// Returns a new view containing the records that satisfy `predicate`.
    #[must_use]
    pub fn matching(&self, predicate: &Predicate) -> Self {
        let records: Vec<_> = self
            .records
            .iter()
            .filter(|record| predicate.matches(record))
            .cloned()
            .collect();
        Self::from_records(records)
    }

    /// Filters by request URL.
    #[must_use]
    pub fn url(&self, expected: impl Into<TextMatch>) -> Self {
        self.matching(&Predicate::Url(expected.into()))
    }

    /// Filters by HTTP method.
    #[must_use]
    pub fn method(&self, expected: impl Into<TextMatch>) -> Self {
        self.matching(&Predicate::method(expected))
    }

    /// Filters by driver resource type.
    #[must_use]
    pub fn resource_type(&self, expected: impl Into<TextMatch>) -> Self {
        self.matching(&Predicate::ResourceType(expected.into()))
    }

    /// Filters by response status.
    #[must_use]
    pub fn status(&self, status: u16) -> Self {
        self.matching(&Predicate::Status(status))
    }

    /// Filters by the cache flag.
    #[must_use]
    pub fn from_cache(&self, cached: bool) -> Self {
        self.matching(&Predicate::FromCache(cached))
    }

    /// Filters by the full response header set (order-sensitive JSON comparison).
    #[must_use]
    pub fn response_headers(&self, expected: Value) -> Self {
        self.matching(&Predicate::ResponseHeaders(expected))
    }

    /// Filters by a single response header.
    #[must_use]
    pub fn response_header(&self, name: impl Into<String>, expected: impl Into<TextMatch>) -> Self {
        self.matching(&Predicate::ResponseHeader {
            name: name.into(),
            expected: expected.into(),
        })
    }

    /// Filters by the success flag.
    #[must_use]
    pub fn ok(&self, ok: bool) -> Self {
        self.matching(&Predicate::Ok(ok))
    }

    /// Filters by request body.
    #[must_use]
    pub fn post_body(&self, expected: impl Into<Expected>) -> Self {
        self.matching(&Predicate::PostBody(expected.into()))
    }

    /// Filters by response body.
    #[must_use]
    pub fn response_body(&self, expected: impl Into<Expected>) -> Self {
        self.matching(&Predicate::ResponseBody(expected.into()))
    }

    /// Filters by whether a mock served the request.
    #[must_use]
    pub fn mocked(&self, mocked: bool) -> Self {
        self.matching(&Predicate::Mocked(mocked))
    }

    /// Number of records in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The earliest-completed record in the view.
    #[must_use]
    pub fn first(&self) -> Option<&Arc<RequestRecord>> {
        self.records.first()
    }

    /// The latest-completed record in the view.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<RequestRecord>> {
        self.records.last()
    }

    /// The records in completion order.
    #[must_use]
    pub fn records(&self) -> &[Arc<RequestRecord>] {
        &self.records
    }

    /// Iterates over the records in completion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RequestRecord>> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a FilterView {
    type Item = &'a Arc<RequestRecord>;
    type IntoIter = std::slice::Iter<'a, Arc<RequestRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
