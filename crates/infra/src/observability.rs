//! Tracing setup
//!
//! One-shot subscriber installation with `RUST_LOG` filtering. Safe to
//! call more than once; later calls are no-ops.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
///
/// Filter defaults to `info` when `RUST_LOG` is unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
