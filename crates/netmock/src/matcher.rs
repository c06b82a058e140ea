//! URL patterns and the uniform text/structure matching contract.
//!
//! Every textual comparison in the crate goes through [`TextMatch`]: when the
//! expected value is a pattern it is tested, otherwise the actual value must be
//! exactly equal. Object-typed expectations ([`Expected::Json`]) are compared by
//! serializing both sides to JSON. That comparison is order-sensitive: `{"a":1,"b":2}`
//! does not equal `{"b":2,"a":1}`.

use crate::error::{NetmockError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Parsed query parameters. Order-insensitive; a repeated key keeps its last value.
pub type QueryParams = BTreeMap<String, String>;

/// Expected text: exact equality or a regular expression test.
#[derive(Debug, Clone)]
pub enum TextMatch {
    /// The actual value must equal this string.
    Exact(String),
    /// The actual value must match this regular expression.
    Pattern(Regex),
}

impl TextMatch {
    /// Creates an exact matcher.
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    /// Compiles a regular-expression matcher.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the expression does not compile.
    pub fn pattern(expression: &str) -> Result<Self> {
        Regex::new(expression)
            .map(Self::Pattern)
            .map_err(|e| NetmockError::programming(format!("invalid pattern '{expression}': {e}")))
    }

    /// Tests the actual value against this expectation.
    #[must_use]
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == actual,
            Self::Pattern(regex) => regex.is_match(actual),
        }
    }
}

impl PartialEq for TextMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl From<&str> for TextMatch {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for TextMatch {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<Regex> for TextMatch {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value:?}"),
            Self::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// Expected header set or body: text, or a JSON structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    /// Compared with the [`TextMatch`] contract.
    Text(TextMatch),
    /// Compared by serializing both sides (order-sensitive).
    Json(Value),
}

impl Expected {
    /// Builds a structural expectation from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the value cannot be represented as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| NetmockError::programming(format!("expected value is not JSON: {e}")))
    }

    /// Tests an optional body against this expectation. A missing body never matches.
    #[must_use]
    pub fn matches_body(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self {
            Self::Text(text) => text.matches(actual),
            Self::Json(expected) => {
                // Non-JSON bodies are compared verbatim against the serialized form.
                let actual = serde_json::from_str::<Value>(actual)
                    .ok()
                    .and_then(|value| serde_json::to_string(&value).ok())
                    .unwrap_or_else(|| actual.to_string());
                serialized_eq(expected, &actual)
            }
        }
    }
}

impl From<&str> for Expected {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<String> for Expected {
    fn from(value: String) -> Self {
        Self::Text(value.into())
    }
}

impl From<Regex> for Expected {
    fn from(regex: Regex) -> Self {
        Self::Text(regex.into())
    }
}

impl From<TextMatch> for Expected {
    fn from(text: TextMatch) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for Expected {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => text.fmt(f),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

/// Compares a JSON value against an already-serialized string.
pub(crate) fn serialized_eq(expected: &Value, actual: &str) -> bool {
    serde_json::to_string(expected).is_ok_and(|expected| expected == actual)
}

/// The URL side of a mock rule.
///
/// Literals participate in specificity ranking: a literal beats a glob or regex
/// when several rules match the same request.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// Exact URL, URL without query, or (when starting with `/`) URL path.
    Literal(String),
    /// Glob: `*` stays within a path segment, `**` crosses segments.
    Glob {
        /// The glob as written
        source: String,
        /// The compiled, anchored equivalent
        regex: Regex,
    },
    /// Arbitrary regular expression, unanchored.
    Regex(Regex),
}

impl UrlPattern {
    /// Creates a literal pattern.
    pub fn literal(url: impl Into<String>) -> Self {
        Self::Literal(url.into())
    }

    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the glob cannot be compiled.
    pub fn glob(source: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(source))
            .map_err(|e| NetmockError::programming(format!("invalid glob '{source}': {e}")))?;
        Ok(Self::Glob {
            source: source.to_string(),
            regex,
        })
    }

    /// Compiles a regular-expression pattern.
    ///
    /// # Errors
    ///
    /// Returns a programming error if the expression does not compile.
    pub fn regex(expression: &str) -> Result<Self> {
        Regex::new(expression)
            .map(Self::Regex)
            .map_err(|e| NetmockError::programming(format!("invalid URL regex '{expression}': {e}")))
    }

    /// Returns true for literal patterns.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Literal(url) => url,
            Self::Glob { source, .. } => source,
            Self::Regex(regex) => regex.as_str(),
        }
    }

    /// Tests a request URL against this pattern.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Literal(literal) => literal_matches(literal, url),
            Self::Glob { regex, .. } | Self::Regex(regex) => regex.is_match(url),
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Glob { .. } => 1,
            Self::Regex(_) => 2,
        }
    }
}

impl PartialEq for UrlPattern {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.as_str() == other.as_str()
    }
}

impl Eq for UrlPattern {}

impl From<&str> for UrlPattern {
    fn from(url: &str) -> Self {
        Self::Literal(url.to_string())
    }
}

impl From<String> for UrlPattern {
    fn from(url: String) -> Self {
        Self::Literal(url)
    }
}

impl From<Regex> for UrlPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(url) => f.write_str(url),
            Self::Glob { source, .. } => write!(f, "glob:{source}"),
            Self::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

fn literal_matches(literal: &str, url: &str) -> bool {
    if literal == url || literal == strip_query(url) {
        return true;
    }
    literal.starts_with('/') && url::Url::parse(url).is_ok_and(|parsed| parsed.path() == literal)
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// Returns the URL without its query string and fragment.
#[must_use]
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Returns the raw query string of a URL, without `?` and fragment.
#[must_use]
pub fn raw_query(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    without_fragment
        .split_once('?')
        .map(|(_, query)| query)
        .filter(|query| !query.is_empty())
}

/// Parses a URL's query string into an order-insensitive map.
#[must_use]
pub fn parse_query(url: &str) -> QueryParams {
    raw_query(url)
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}
