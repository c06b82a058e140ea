//! Logging setup for sessions and test binaries.
//!
//! The engine logs through `tracing`: request routing and rule changes at
//! DEBUG, session lifecycle at INFO, driver failures at WARN. Nothing is
//! printed unless a subscriber is installed; these helpers install one.
//!
//! # Example
//!
//! ```rust,no_run
//! use netmock::logger::init_logger;
//!
//! init_logger(true, false, false);
//! tracing::debug!("routing enabled");
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERBOSE_FILTER: &str = "netmock=debug";
const QUIET_FILTER: &str = "netmock=error";
const DEFAULT_FILTER: &str = "netmock=info";

/// Chooses the filter for the given flags.
///
/// Priority: `verbose` > `quiet` > `RUST_LOG` > INFO for this crate.
#[must_use]
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs a global compact subscriber.
///
/// Safe to call more than once: later calls are ignored, so every test can
/// call it without coordinating.
///
/// * `verbose` - DEBUG for this crate (overrides `quiet`)
/// * `quiet` - errors only
/// * `no_color` - disable ANSI colors
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

/// Installs a global subscriber with a custom filter.
///
/// ```rust,no_run
/// use netmock::logger::init_logger_with_filter;
/// use tracing_subscriber::EnvFilter;
///
/// init_logger_with_filter(EnvFilter::new("netmock=trace,chromiumoxide=warn"), true);
/// ```
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .with_test_writer()
        .compact();

    // Err means a subscriber is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
