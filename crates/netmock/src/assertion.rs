//! Existence assertions over the request log, and their inversion.
//!
//! [`AssertionFilterChain`] collects predicates and, when awaited, polls the
//! live log until some record satisfies all of them. An empty result is an
//! [`AssertionFailure`]; the matching records come back as a [`FilterView`].
//!
//! Inversion is a pure mapping over the result ([`invert`]): an assertion
//! failure becomes a pass, a pass becomes an assertion failure, and every other
//! error kind passes through unchanged.

use crate::error::{AssertionFailure, NetmockError, Result};
use crate::filter::{FilterView, Predicate};
use crate::log::RequestLog;
use crate::matcher::{Expected, TextMatch};
use crate::wait::{wait_for_some, WaitConfig};
use serde_json::Value;
use std::fmt::Write as _;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

/// Maps an expectation's result to its negation.
///
/// Only [`NetmockError::Assertion`] is swallowed; programming, session and
/// driver errors are returned unchanged.
///
/// # Errors
///
/// Returns an [`AssertionFailure`] described by `description` if `result` was
/// `Ok`, or the original error if it was not an assertion failure.
pub fn invert<T>(result: Result<T>, description: impl Into<String>) -> Result<()> {
    match result {
        Ok(_) => Err(AssertionFailure::new(description).into()),
        Err(NetmockError::Assertion(_)) => Ok(()),
        Err(other) => Err(other),
    }
}

/// Awaitable filter over the live request log.
///
/// # Example
///
/// ```ignore
/// let matched = session.log().filter().method("POST").status(201).await?;
/// assert_eq!(matched.len(), 1);
///
/// session.log().filter().url("http://localhost/never").not()?;
/// ```
#[derive(Debug, Clone)]
#[must_use = "an assertion chain does nothing until awaited"]
pub struct AssertionFilterChain {
    log: RequestLog,
    predicates: Vec<Predicate>,
    wait: WaitConfig,
}

impl AssertionFilterChain {
    pub(crate) fn new(log: RequestLog, wait: WaitConfig) -> Self {
        Self {
            log,
            predicates: Vec::new(),
            wait,
        }
    }

    /// Adds an arbitrary predicate.
    pub fn matching(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Requires the request URL to match.
    pub fn url(self, expected: impl Into<TextMatch>) -> Self {
        self.matching(Predicate::Url(expected.into()))
    }

    /// Requires the HTTP method to match.
    pub fn method(self, expected: impl Into<TextMatch>) -> Self {
        self.matching(Predicate::method(expected))
    }

    /// Requires the resource type to match.
    pub fn resource_type(self, expected: impl Into<TextMatch>) -> Self {
        self.matching(Predicate::ResourceType(expected.into()))
    }

    /// Requires the response status.
    pub fn status(self, status: u16) -> Self {
        self.matching(Predicate::Status(status))
    }

    /// Requires the cache flag.
    pub fn from_cache(self, cached: bool) -> Self {
        self.matching(Predicate::FromCache(cached))
    }

    /// Requires the full response header set (order-sensitive).
    pub fn response_headers(self, expected: Value) -> Self {
        self.matching(Predicate::ResponseHeaders(expected))
    }

    /// Requires one response header.
    pub fn response_header(self, name: impl Into<String>, expected: impl Into<TextMatch>) -> Self {
        self.matching(Predicate::ResponseHeader {
            name: name.into(),
            expected: expected.into(),
        })
    }

    /// Requires the success flag.
    pub fn ok(self, ok: bool) -> Self {
        self.matching(Predicate::Ok(ok))
    }

    /// Requires the request body.
    pub fn post_body(self, expected: impl Into<Expected>) -> Self {
        self.matching(Predicate::PostBody(expected.into()))
    }

    /// Requires the response body.
    pub fn response_body(self, expected: impl Into<Expected>) -> Self {
        self.matching(Predicate::ResponseBody(expected.into()))
    }

    /// Requires the request to have been served (or not) by a mock.
    pub fn mocked(self, mocked: bool) -> Self {
        self.matching(Predicate::Mocked(mocked))
    }

    /// Overrides how long the chain waits for a match.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.wait.timeout = timeout;
        self
    }

    /// The predicates composed so far.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Applies the predicates to the log as it is right now.
    #[must_use]
    pub fn evaluate_now(&self) -> FilterView {
        self.predicates
            .iter()
            .fold(self.log.view(), |view, predicate| view.matching(predicate))
    }

    /// Asserts, immediately and without waiting, that no record matches.
    ///
    /// # Errors
    ///
    /// Returns an [`AssertionFailure`] if any record matches.
    pub fn not(self) -> Result<()> {
        let description = format!("expected no request matching [{}]", self.describe());
        invert(self.resolve_now(), description)
    }

    fn resolve_now(&self) -> Result<FilterView> {
        let view = self.evaluate_now();
        if view.is_empty() {
            Err(self.failure().into())
        } else {
            Ok(view)
        }
    }

    async fn resolve(self) -> Result<FilterView> {
        let found = wait_for_some(
            || {
                let view = self.evaluate_now();
                async move { (!view.is_empty()).then_some(view) }
            },
            self.wait,
        )
        .await;

        found.ok_or_else(|| self.failure().into())
    }

    fn describe(&self) -> String {
        if self.predicates.is_empty() {
            return "any request".to_string();
        }
        let mut out = String::new();
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{predicate}");
        }
        out
    }

    fn failure(&self) -> AssertionFailure {
        AssertionFailure::new(format!(
            "expected a request matching [{}] within {:?}; {} recorded request(s) inspected",
            self.describe(),
            self.wait.timeout,
            self.log.len()
        ))
    }
}

impl IntoFuture for AssertionFilterChain {
    type Output = Result<FilterView>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve())
    }
}

/// A call-count expectation for [`crate::MockHandle::called_times`].
///
/// Parses from `"once"`, `"twice"`, `"thrice"`, `"3"` or `"3 times"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    /// Called one or more times.
    AtLeastOnce,
    /// Called exactly this many times.
    Exactly(usize),
}

impl Times {
    /// Exactly `n` calls.
    #[must_use]
    pub fn exactly(n: usize) -> Self {
        Self::Exactly(n)
    }

    /// Checks an observed call count.
    #[must_use]
    pub fn is_satisfied_by(self, calls: usize) -> bool {
        match self {
            Self::AtLeastOnce => calls > 0,
            Self::Exactly(n) => calls == n,
        }
    }
}

impl FromStr for Times {
    type Err = NetmockError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim().to_ascii_lowercase();
        let count = match input.as_str() {
            "once" => Some(1),
            "twice" => Some(2),
            "thrice" => Some(3),
            other => other
                .strip_suffix("times")
                .or_else(|| other.strip_suffix("time"))
                .unwrap_or(other)
                .trim()
                .parse::<usize>()
                .ok(),
        };
        count
            .map(Self::Exactly)
            .ok_or_else(|| NetmockError::programming(format!("malformed call count '{s}'")))
    }
}

impl std::fmt::Display for Times {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtLeastOnce => f.write_str("at least once"),
            Self::Exactly(1) => f.write_str("exactly once"),
            Self::Exactly(n) => write!(f, "exactly {n} times"),
        }
    }
}
