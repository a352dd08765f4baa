//! Tracing setup for the supervisor binary.
//!
//! Library code only emits `tracing` events and spans; installing a subscriber
//! is left to the application. Stage messages routed through
//! [`TracingLogger`](crate::effects::resolve::TracingLogger) use the
//! `supervisor::stage` target.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` (the configured
/// `log_filter`) if unset. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=supervisor=debug cargo run -- effects
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
