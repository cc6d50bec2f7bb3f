//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directives used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,tracer_renderer=debug,tracer_rhi=debug";

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG), falling back to [`DEFAULT_FILTER`]
/// - Target and thread id on every line, since jobs log from worker threads
///
/// Calling it more than once is harmless; later calls are ignored.
///
/// # Example
/// ```
/// tracer_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
