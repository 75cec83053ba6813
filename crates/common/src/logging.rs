//! Logging utilities for the failover crates.

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels.
/// Default level is INFO.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter())
        .init();
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json() {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(env_filter())
        .init();
}

/// Initialize tracing with an extra layer installed ahead of the formatter.
///
/// Used to attach the exception bridge so ERROR events reach it before
/// they are written out.
pub fn init_with_layer(extra: Box<dyn Layer<Registry> + Send + Sync>) {
    tracing_subscriber::registry()
        .with(extra)
        .with(fmt::layer())
        .with(env_filter())
        .init();
}
