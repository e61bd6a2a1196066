//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted tracing subscriber.
///
/// `RUST_LOG` wins over `default_directive`. Calling this more than once, or
/// after another subscriber was installed, is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
