//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,frameloop=debug";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Targets and thread ids on every line
///
/// # Example
/// ```
/// frameloop_core::init_logging();
/// tracing::info!("Presentation engine starting");
/// ```
pub fn init_logging() {
    init_logging_with(DEFAULT_LOG_FILTER);
}

/// Initialize logging with a fallback filter used when `RUST_LOG` is unset.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init_logging_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if result.is_err() {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}
