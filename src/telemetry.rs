//! Logging configuration for the harness
//!
//! Plain tracing-based logging to stderr, filtered with `RUST_LOG`.
//!
//! # Example
//!
//! ```no_run
//! use kuadrant_e2e::telemetry::init_logging;
//!
//! init_logging();
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
///
/// kube and hyper are chatty at info level, so only their warnings pass.
pub const DEFAULT_FILTER: &str = "info,kube=warn,hyper=warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging with tracing-subscriber
///
/// Uses `RUST_LOG` for filtering. Safe to call more than once.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Initialize logging for test binaries
///
/// Output goes through libtest's capture, so it only shows for failing
/// tests (or with `--nocapture`).
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging() {
        // Should not panic when called multiple times
        init_test_logging();
        init_logging();
        init_test_logging();
    }
}
