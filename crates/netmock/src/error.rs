//! Error types for interception, mocking and request-log assertions.
//!
//! The taxonomy separates three kinds of failure that callers treat very
//! differently:
//!
//! - **Programming errors**: the mock surface was used incorrectly (an invalid
//!   option combination, triggering an auto-responding mock, a malformed call
//!   count). These fail synchronously at the call site.
//! - **Assertion failures**: an expected condition evaluated false. These are the
//!   only errors that inversion helpers (see [`crate::assertion::invert`]) treat
//!   as a pass.
//! - **Session and driver errors**: the session was closed, or the browser
//!   driver refused an operation.
//!
//! "Not found" is never an error here; an empty [`crate::FilterView`] carries it.

use thiserror::Error;

/// The main error type for all interception operations.
#[derive(Debug, Error)]
pub enum NetmockError {
    /// The API was used in a way that can never succeed.
    ///
    /// Examples: a status code outside `100..=599`, a redirect combined with a
    /// body, or calling `trigger()` on a mock that responds automatically.
    #[error("programming error: {0}")]
    Programming(String),

    /// An expectation about recorded traffic or mock usage evaluated false.
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    /// An operation was attempted on a closed interception session.
    #[error("interception session is closed")]
    SessionClosed,

    /// The browser driver failed to continue, fulfill or abort a request.
    #[error("driver failed to {operation} request: {reason}")]
    Driver {
        /// The driver primitive that failed
        operation: &'static str,
        /// Reason reported by the driver
        reason: String,
    },

    /// Configuration could not be loaded or extracted.
    #[error("invalid configuration: {0}")]
    Config(Box<figment::Error>),

    /// Wraps errors from the chromiumoxide library.
    #[error("chromiumoxide error: {0}")]
    ChromiumOxide(#[from] chromiumoxide::error::CdpError),
}

impl NetmockError {
    /// Shorthand for a [`NetmockError::Programming`] error.
    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming(message.into())
    }

    /// Returns true if this error is an [`AssertionFailure`].
    #[must_use]
    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion(_))
    }
}

impl From<figment::Error> for NetmockError {
    fn from(error: figment::Error) -> Self {
        Self::Config(Box::new(error))
    }
}

/// A failed expectation.
///
/// Inversion matches on this type, never on message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("assertion failed: {message}")]
pub struct AssertionFailure {
    message: String,
}

impl AssertionFailure {
    /// Creates a failure with a descriptive message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The human-readable description of what was expected.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A specialized Result type for interception operations.
pub type Result<T> = std::result::Result<T, NetmockError>;
