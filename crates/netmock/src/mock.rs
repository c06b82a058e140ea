//! Mock rules: registration options, validation, specificity and responses.
//!
//! A [`MockRule`] is built from a [`UrlPattern`] plus [`MockOptions`]. Invalid
//! option combinations are rejected when the rule is built, so registration
//! fails synchronously at the call site.

use crate::assertion::Times;
use crate::error::{AssertionFailure, NetmockError, Result};
use crate::matcher::{raw_query, strip_query, QueryParams, UrlPattern};
use crate::record::{Headers, RequestDescriptor};
use crate::trigger::ManualGate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

/// Body of a mocked response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MockBody {
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON when the response is rendered.
    Json(Value),
}

impl MockBody {
    /// Builds a JSON body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the value cannot be represented as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| NetmockError::programming(format!("mock body is not JSON: {e}")))
    }

    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    fn default_content_type(&self) -> &'static str {
        match self {
            Self::Text(_) => "text/plain",
            Self::Json(_) => "application/json",
        }
    }
}

impl From<&str> for MockBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MockBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for MockBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// What happens to the original query string on redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryRewrite {
    /// Append the original query to the redirect target.
    #[default]
    Preserve,
    /// Redirect without any query.
    Drop,
    /// Use this query instead (without leading `?`).
    Replace(String),
}

/// Options accepted when registering a mock.
///
/// # Example
///
/// ```ignore
/// let options = MockOptions::new()
///     .with_method("POST")
///     .with_status(201)
///     .with_body(json!({"id": 7}));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MockOptions {
    /// Response status (default: the session's default status, normally 200).
    pub status: Option<u16>,
    /// Response headers.
    pub headers: Headers,
    /// `Content-Type` header; inferred from the body when absent.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Option<MockBody>,
    /// Delay before fulfilling (after the trigger, for manual mocks).
    pub delay: Duration,
    /// Only match requests with this method.
    pub method: Option<String>,
    /// Only match requests whose parsed query equals this map.
    pub query_string: Option<QueryParams>,
    /// Fulfill immediately (`true`) or hold until triggered (`false`).
    pub auto: bool,
    /// Respond with a redirect to this URL instead of a body.
    pub redirect_to: Option<String>,
    /// Query handling for redirects.
    pub redirect_query: QueryRewrite,
}

impl MockOptions {
    /// Creates default options: auto-responding, no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the `Content-Type`.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<MockBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Delays fulfillment.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Restricts the rule to one HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Adds one required query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_string
            .get_or_insert_with(QueryParams::new)
            .insert(key.into(), value.into());
        self
    }

    /// Holds matching requests until [`MockHandle::trigger`] is called.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.auto = false;
        self
    }

    /// Responds with a redirect.
    #[must_use]
    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    /// Sets query handling for redirects.
    #[must_use]
    pub fn with_redirect_query(mut self, rewrite: QueryRewrite) -> Self {
        self.redirect_query = rewrite;
        self
    }
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            status: None,
            headers: Headers::new(),
            content_type: None,
            body: None,
            delay: Duration::ZERO,
            method: None,
            query_string: None,
            auto: true,
            redirect_to: None,
            redirect_query: QueryRewrite::Preserve,
        }
    }
}

/// Session-wide response defaults applied when options leave them unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDefaults {
    /// Status used when a rule sets none.
    pub status: u16,
    /// Content type used when a rule sets none and has no body to infer from.
    pub content_type: Option<String>,
}

impl Default for MockDefaults {
    fn default() -> Self {
        Self {
            status: 200,
            content_type: None,
        }
    }
}

/// The concrete response handed to the driver for fulfillment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers, including `Content-Type` and `Location` when set.
    pub headers: Headers,
    /// Rendered body.
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Redirect {
    target: String,
    query: QueryRewrite,
}

/// Identity of a rule for replace-on-duplicate: `(url, method, query)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RuleSignature {
    pattern: UrlPattern,
    method: Option<String>,
    query: Option<QueryParams>,
}

impl RuleSignature {
    pub(crate) fn new(pattern: UrlPattern, options: &MockOptions) -> Self {
        Self {
            pattern,
            method: options.method.as_deref().map(str::to_ascii_uppercase),
            query: options.query_string.clone(),
        }
    }

    pub(crate) fn pattern(&self) -> &UrlPattern {
        &self.pattern
    }
}

/// A registered mock definition.
///
/// Rules are shared as `Arc<MockRule>` between the registry, the controller's
/// per-request tasks and [`MockHandle`]s; only the call counter and the manual
/// gate change after construction.
#[derive(Debug)]
pub struct MockRule {
    signature: RuleSignature,
    status: u16,
    headers: Headers,
    body: Option<MockBody>,
    delay: Duration,
    auto: bool,
    redirect: Option<Redirect>,
    calls: AtomicUsize,
    gate: ManualGate,
}

impl MockRule {
    /// Validates options and builds a rule.
    pub(crate) fn build(pattern: UrlPattern, options: MockOptions, defaults: &MockDefaults) -> Result<Self> {
        if let Some(status) = options.status {
            if !(100..=599).contains(&status) {
                return Err(NetmockError::programming(format!(
                    "status {status} is outside 100..=599"
                )));
            }
        }
        if let Some(method) = &options.method {
            if method.trim().is_empty() {
                return Err(NetmockError::programming("method constraint is empty"));
            }
        }

        let redirect = match options.redirect_to.clone() {
            Some(target) => {
                if options.body.is_some() {
                    return Err(NetmockError::programming(format!(
                        "mock for {pattern} sets both a redirect and a body"
                    )));
                }
                if let Some(status) = options.status {
                    if !(300..=399).contains(&status) {
                        return Err(NetmockError::programming(format!(
                            "redirect mock for {pattern} has non-redirect status {status}"
                        )));
                    }
                }
                Some(Redirect {
                    target,
                    query: options.redirect_query.clone(),
                })
            }
            None => None,
        };

        let status = options
            .status
            .unwrap_or(if redirect.is_some() { 302 } else { defaults.status });

        let mut headers = options.headers.clone();
        let content_type = options
            .content_type
            .clone()
            .or_else(|| options.body.as_ref().map(|b| b.default_content_type().to_string()))
            .or_else(|| defaults.content_type.clone());
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type);
        }

        Ok(Self {
            signature: RuleSignature::new(pattern, &options),
            status,
            headers,
            body: options.body,
            delay: options.delay,
            auto: options.auto,
            redirect,
            calls: AtomicUsize::new(0),
            gate: ManualGate::default(),
        })
    }

    /// The URL pattern.
    #[must_use]
    pub fn pattern(&self) -> &UrlPattern {
        &self.signature.pattern
    }

    /// The upper-cased method constraint, if any.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.signature.method.as_deref()
    }

    /// The query constraint, if any.
    #[must_use]
    pub fn query_constraint(&self) -> Option<&QueryParams> {
        self.signature.query.as_ref()
    }

    /// Whether matching requests are fulfilled without a trigger.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// Fulfillment delay.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// How many requests this rule has fulfilled.
    #[must_use]
    pub fn times_called(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// How many requests are currently held waiting for a trigger.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.gate.held()
    }

    /// The ranking used to pick one rule among several matches.
    #[must_use]
    pub fn specificity(&self) -> Specificity {
        Specificity {
            method: self.signature.method.is_some(),
            literal_url: self.signature.pattern.is_literal(),
            query: self.signature.query.is_some(),
        }
    }

    pub(crate) fn signature(&self) -> &RuleSignature {
        &self.signature
    }

    pub(crate) fn gate(&self) -> &ManualGate {
        &self.gate
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Tests URL, method and query constraints.
    #[must_use]
    pub fn matches(&self, request: &RequestDescriptor) -> bool {
        if !self.signature.pattern.matches(&request.url) {
            return false;
        }
        if let Some(method) = &self.signature.method {
            if !method.eq_ignore_ascii_case(&request.method) {
                return false;
            }
        }
        match &self.signature.query {
            Some(query) => *query == request.query(),
            None => true,
        }
    }

    /// Renders the response for one request.
    pub(crate) fn respond_to(&self, request: &RequestDescriptor) -> MockResponse {
        let mut headers = self.headers.clone();

        if let Some(redirect) = &self.redirect {
            let query = match &redirect.query {
                QueryRewrite::Preserve => raw_query(&request.url).map(str::to_string),
                QueryRewrite::Drop => None,
                QueryRewrite::Replace(query) => Some(query.trim_start_matches('?').to_string()),
            };
            let location = match query {
                Some(query) if !query.is_empty() => {
                    format!("{}?{query}", strip_query(&redirect.target))
                }
                _ => redirect.target.clone(),
            };
            headers.insert("location".to_string(), location);
            return MockResponse {
                status: self.status,
                headers,
                body: None,
            };
        }

        MockResponse {
            status: self.status,
            headers,
            body: self.body.as_ref().map(MockBody::render),
        }
    }
}

/// Which of a rule's optional constraints are present.
///
/// Criteria are compared in [`SPECIFICITY_CRITERIA`] order; the first that
/// differs decides, and "has it" beats "lacks it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    /// A method constraint is set.
    pub method: bool,
    /// The URL pattern is a literal.
    pub literal_url: bool,
    /// A query constraint is set.
    pub query: bool,
}

/// A named specificity criterion.
pub type Criterion = (&'static str, fn(&Specificity) -> bool);

fn has_method(s: &Specificity) -> bool {
    s.method
}

fn has_literal_url(s: &Specificity) -> bool {
    s.literal_url
}

fn has_query(s: &Specificity) -> bool {
    s.query
}

/// The ordered comparator criteria for resolving overlapping rules.
pub const SPECIFICITY_CRITERIA: [Criterion; 3] = [
    ("method", has_method),
    ("literal url", has_literal_url),
    ("query", has_query),
];

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        SPECIFICITY_CRITERIA
            .iter()
            .map(|(_, criterion)| criterion(self).cmp(&criterion(other)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Test-facing handle to a registered mock.
#[derive(Debug, Clone)]
pub struct MockHandle {
    rule: Arc<MockRule>,
}

impl MockHandle {
    pub(crate) fn new(rule: Arc<MockRule>) -> Self {
        Self { rule }
    }

    /// The underlying rule.
    #[must_use]
    pub fn rule(&self) -> &MockRule {
        &self.rule
    }

    /// How many requests this mock has fulfilled.
    #[must_use]
    pub fn times_called(&self) -> usize {
        self.rule.times_called()
    }

    /// Asserts the mock fulfilled at least one request.
    ///
    /// # Errors
    ///
    /// Returns an [`AssertionFailure`] if it was never called.
    pub fn called(&self) -> Result<()> {
        self.called_times(Times::AtLeastOnce)
    }

    /// Asserts the mock's call count.
    ///
    /// # Errors
    ///
    /// Returns an [`AssertionFailure`] if the count does not satisfy `times`.
    pub fn called_times(&self, times: Times) -> Result<()> {
        let calls = self.times_called();
        if times.is_satisfied_by(calls) {
            Ok(())
        } else {
            Err(AssertionFailure::new(format!(
                "expected mock {} to be called {times}, but it was called {calls} time(s)",
                self.rule.pattern()
            ))
            .into())
        }
    }

    /// Releases one held request and waits until it has been fulfilled.
    ///
    /// If no request is held yet, this waits for the next matching request
    /// instead of fulfilling anything early.
    ///
    /// # Errors
    ///
    /// Returns a programming error for auto-responding mocks, and
    /// [`NetmockError::SessionClosed`] if the session is (or becomes) closed.
    pub async fn trigger(&self) -> Result<()> {
        if self.rule.is_auto() {
            return Err(NetmockError::programming(format!(
                "mock {} responds automatically and cannot be triggered",
                self.rule.pattern()
            )));
        }
        self.rule.gate().trigger().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(pattern: impl Into<UrlPattern>, options: MockOptions) -> MockRule {
        MockRule::build(pattern.into(), options, &MockDefaults::default()).unwrap()
    }

    #[test]
    fn json_body_is_serialized_with_content_type() {
        let rule = rule("/api", MockOptions::new().with_body(json!({"result": "X"})));
        let response = rule.respond_to(&RequestDescriptor::new("GET", "http://h/api"));

        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_deref(), Some(r#"{"result":"X"}"#));
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn explicit_content_type_wins() {
        let rule = rule(
            "/a",
            MockOptions::new()
                .with_body("<p>hi</p>")
                .with_content_type("text/html"),
        );
        let response = rule.respond_to(&RequestDescriptor::new("GET", "/a"));
        assert_eq!(response.headers.get("content-type").map(String::as_str), Some("text/html"));
    }

    #[test]
    fn invalid_combinations_fail_at_build() {
        let defaults = MockDefaults::default();
        let cases = [
            MockOptions::new().with_status(42),
            MockOptions::new().with_method("  "),
            MockOptions::new().with_redirect("/b").with_body("x"),
            MockOptions::new().with_redirect("/b").with_status(200),
        ];
        for options in cases {
            let result = MockRule::build("/a".into(), options.clone(), &defaults);
            assert!(
                matches!(result, Err(NetmockError::Programming(_))),
                "{options:?} should be rejected"
            );
        }
    }

    #[test]
    fn redirect_preserves_query_by_default() {
        let rule = rule("/old", MockOptions::new().with_redirect("http://h/new"));
        let response = rule.respond_to(&RequestDescriptor::new("GET", "http://h/old?a=1&b=2"));

        assert_eq!(response.status, 302);
        assert_eq!(
            response.headers.get("location").map(String::as_str),
            Some("http://h/new?a=1&b=2")
        );
        assert!(response.body.is_none());
    }

    #[test]
    fn redirect_query_rewrites() {
        let request = RequestDescriptor::new("GET", "http://h/old?a=1");

        let dropped = rule(
            "/old",
            MockOptions::new()
                .with_redirect("http://h/new")
                .with_redirect_query(QueryRewrite::Drop),
        );
        assert_eq!(
            dropped.respond_to(&request).headers.get("location").map(String::as_str),
            Some("http://h/new")
        );

        let replaced = rule(
            "/old",
            MockOptions::new()
                .with_redirect("http://h/new")
                .with_status(301)
                .with_redirect_query(QueryRewrite::Replace("z=9".into())),
        );
        let response = replaced.respond_to(&request);
        assert_eq!(response.status, 301);
        assert_eq!(
            response.headers.get("location").map(String::as_str),
            Some("http://h/new?z=9")
        );
    }

    #[test]
    fn constraints_filter_requests() {
        let rule = rule(
            "http://h/search",
            MockOptions::new().with_method("get").with_query("q", "rust"),
        );
        assert!(rule.matches(&RequestDescriptor::new("GET", "http://h/search?q=rust")));
        assert!(!rule.matches(&RequestDescriptor::new("POST", "http://h/search?q=rust")));
        assert!(!rule.matches(&RequestDescriptor::new("GET", "http://h/search?q=go")));
        assert!(!rule.matches(&RequestDescriptor::new("GET", "http://h/search?q=rust&page=2")));
    }

    #[test]
    fn specificity_criteria_are_ordered() {
        let method_only = Specificity { method: true, literal_url: false, query: false };
        let literal_and_query = Specificity { method: false, literal_url: true, query: true };
        assert!(method_only > literal_and_query);

        let literal = Specificity { method: false, literal_url: true, query: false };
        let query = Specificity { method: false, literal_url: false, query: true };
        assert!(literal > query);
        assert_eq!(literal.cmp(&literal), Ordering::Equal);
    }

    #[tokio::test]
    async fn triggering_an_auto_mock_is_a_programming_error() {
        let handle = MockHandle::new(Arc::new(rule("/a", MockOptions::new())));
        assert!(matches!(handle.trigger().await, Err(NetmockError::Programming(_))));
    }

    #[test]
    fn called_assertions() {
        let handle = MockHandle::new(Arc::new(rule("/a", MockOptions::new())));
        assert!(handle.called().unwrap_err().is_assertion());
        handle.rule().record_call();
        handle.called().unwrap();
        handle.called_times("once".parse().unwrap()).unwrap();
        assert!(handle.called_times(Times::exactly(2)).is_err());
    }
}
