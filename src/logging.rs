//! Logging infrastructure for Turnstile
//!
//! Structured logging via tracing with env-filter overrides.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for the process.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to
/// this crate and `info` to everything else.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("turnstile={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
