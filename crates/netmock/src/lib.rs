//! # netmock
//!
//! Network request interception, mocking and request-log assertions for
//! browser tests, built on chromiumoxide.
//!
//! Every request a page issues is paused and routed: if a registered mock
//! matches, the request is answered locally (immediately, after a delay, or
//! when the test triggers it); otherwise it goes to the network. Either way a
//! record of the completed request lands in an append-only log that tests
//! query with chainable filters.
//!
//! ## Architecture
//!
//! - **InterceptSession**: Owns one controller, registry and log per page
//! - **MockRegistry / MockRule**: Registered mocks and best-match resolution
//! - **InterceptionController**: Event loop routing driver events
//! - **RequestLog / FilterView**: Completion-ordered records and filters
//! - **AssertionFilterChain**: Awaitable "some request matched" assertions
//! - **RequestDriver**: Trait seam to the browser; [`ChromiumDriver`] talks
//!   DevTools, [`ScriptedDriver`] runs in memory
//!
//! ## Example Usage
//!
//! ```ignore
//! use netmock::{ChromiumDriver, InterceptConfig, InterceptSession, MockOptions};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn dashboard_loads_users() -> netmock::Result<()> {
//!     let (driver, events) = ChromiumDriver::attach(page.clone()).await?;
//!     let session = InterceptSession::start(driver, events, &InterceptConfig::load(None)?)?;
//!
//!     let users = session.register_mock(
//!         "/api/users",
//!         MockOptions::new().with_body(json!([{"name": "Ada"}])),
//!     )?;
//!
//!     page.goto("http://localhost:3000/dashboard").await?;
//!
//!     users.called_times("once".parse()?)?;
//!     session.filter().url("http://localhost:3000/api/users").status(200).await?;
//!     session.filter().method("DELETE").not()?;
//!
//!     session.close().await
//! }
//! ```
//!
//! ## Testing Strategy
//!
//! 1. **Unit and integration tests**: Drive sessions through [`ScriptedDriver`]
//! 2. **Browser tests**: Real Chrome, marked `#[ignore]`
//!
//! Run with `cargo test` or `cargo test -- --ignored`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assertion;
pub mod chromium;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod filter;
pub mod log;
pub mod logger;
pub mod matcher;
pub mod mock;
pub mod record;
pub mod registry;
pub mod scripted;
pub mod session;
mod trigger;
pub mod wait;


// Re-export main types for convenience
pub use assertion::{invert, AssertionFilterChain, Times};
pub use chromium::ChromiumDriver;
pub use config::{InterceptConfig, MockDefinition, PatternKind};
pub use controller::{InterceptionController, RequestState};
pub use driver::{DriverEvent, DriverEvents, RequestDriver};
pub use error::{AssertionFailure, NetmockError, Result};
pub use filter::{FilterView, Predicate};
pub use log::RequestLog;
pub use matcher::{Expected, QueryParams, TextMatch, UrlPattern};
pub use mock::{
    MockBody, MockDefaults, MockHandle, MockOptions, MockResponse, MockRule, QueryRewrite,
    Specificity, SPECIFICITY_CRITERIA,
};
pub use record::{Headers, ObservedResponse, RequestDescriptor, RequestId, RequestRecord};
pub use registry::MockRegistry;
pub use scripted::{DriverCall, ScriptedDriver};
pub use session::InterceptSession;
pub use wait::{WaitConfig, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
