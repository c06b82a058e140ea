//! Session configuration and declarative mock fixtures.
//!
//! Configuration is layered with figment. Priority: environment variables
//! (`NETMOCK_*`) > config file > defaults. The config file is either the path
//! given to [`InterceptConfig::load`] or `netmock.toml` in the working
//! directory; `.json` files are read as JSON.

use crate::error::{NetmockError, Result};
use crate::matcher::{QueryParams, UrlPattern};
use crate::mock::{MockBody, MockDefaults, MockOptions, QueryRewrite};
use crate::record::Headers;
use crate::wait::WaitConfig;
use figment::providers::{Env, Format as _, Json, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Conventional config file name.
pub const DEFAULT_CONFIG_FILE: &str = "netmock.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NETMOCK_";

/// Settings for one interception session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptConfig {
    /// How long awaited log assertions wait for a matching request.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// How often awaited log assertions re-read the log.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Status for mocks that set none.
    #[serde(default = "default_status")]
    pub default_status: u16,

    /// Content type for mocks that set none and have no body.
    #[serde(default)]
    pub default_content_type: Option<String>,

    /// Mocks registered when the session starts.
    #[serde(default)]
    pub mocks: Vec<MockDefinition>,
}

impl InterceptConfig {
    /// Loads configuration from defaults, a config file and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`NetmockError::Config`] if a source cannot be parsed or a field
    /// has the wrong type.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            default_path.exists().then(|| default_path.to_path_buf())
        });

        if let Some(path) = config_file {
            figment = if path.extension().is_some_and(|ext| ext == "json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        Self::from_figment(&figment)
    }

    /// Extracts configuration from a prepared figment.
    ///
    /// # Errors
    ///
    /// Returns [`NetmockError::Config`] if extraction fails.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }

    /// Wait settings for assertion chains.
    #[must_use]
    pub fn wait_config(&self) -> WaitConfig {
        WaitConfig::new(
            Duration::from_millis(self.wait_timeout_ms),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    /// Response defaults for mock rules.
    #[must_use]
    pub fn mock_defaults(&self) -> MockDefaults {
        MockDefaults {
            status: self.default_status,
            content_type: self.default_content_type.clone(),
        }
    }
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            default_status: default_status(),
            default_content_type: None,
            mocks: Vec::new(),
        }
    }
}

/// How a definition's `url` is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Exact URL / path.
    #[default]
    Literal,
    /// Glob with `*` and `**`.
    Glob,
    /// Regular expression.
    Regex,
}

/// Serializable form of a mock registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockDefinition {
    /// URL pattern source, interpreted per `pattern_kind`.
    pub url: String,

    /// How `url` is interpreted.
    #[serde(default)]
    pub pattern_kind: PatternKind,

    /// Response status.
    #[serde(default)]
    pub status: Option<u16>,

    /// Response headers.
    #[serde(default)]
    pub headers: Headers,

    /// `Content-Type` override.
    #[serde(default)]
    pub content_type: Option<String>,

    /// Text or JSON body.
    #[serde(default)]
    pub body: Option<MockBody>,

    /// Fulfillment delay in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,

    /// Method constraint.
    #[serde(default)]
    pub method: Option<String>,

    /// Values must be scalars; they are compared as strings.
    #[serde(default)]
    pub query_string: Option<BTreeMap<String, Value>>,

    /// False holds requests until triggered.
    #[serde(default = "default_auto")]
    pub auto: bool,

    /// Redirect target.
    #[serde(default)]
    pub redirect_to: Option<String>,

    /// Query handling for redirects.
    #[serde(default)]
    pub redirect_query: QueryRewrite,
}

impl MockDefinition {
    /// Converts to the pattern and options accepted by registration.
    ///
    /// # Errors
    ///
    /// Returns a programming error for an invalid pattern or a non-scalar
    /// query value.
    pub fn into_parts(self) -> Result<(UrlPattern, MockOptions)> {
        let pattern = match self.pattern_kind {
            PatternKind::Literal => UrlPattern::literal(self.url),
            PatternKind::Glob => UrlPattern::glob(&self.url)?,
            PatternKind::Regex => UrlPattern::regex(&self.url)?,
        };

        let query_string = self
            .query_string
            .map(|query| {
                query
                    .into_iter()
                    .map(|(key, value)| scalar_to_string(&key, value).map(|value| (key, value)))
                    .collect::<Result<QueryParams>>()
            })
            .transpose()?;

        let options = MockOptions {
            status: self.status,
            headers: self.headers,
            content_type: self.content_type,
            body: self.body,
            delay: Duration::from_millis(self.delay_ms),
            method: self.method,
            query_string,
            auto: self.auto,
            redirect_to: self.redirect_to,
            redirect_query: self.redirect_query,
        };
        Ok((pattern, options))
    }
}

fn scalar_to_string(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(NetmockError::programming(format!(
            "query constraint '{key}' must be a string, number or boolean, got {other}"
        ))),
    }
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    25
}

fn default_status() -> u16 {
    200
}

fn default_auto() -> bool {
    true
}
