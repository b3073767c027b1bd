//! `tracing` subscriber initialization.
//!
//! Embedders call [`init`] once at startup. The filter comes from
//! `LIAISON_LOG` (falling back to `RUST_LOG`, then the given default),
//! so operators can tune per-module verbosity without rebuilding.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber with an env-derived filter.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init(default_filter: &str) {
    let filter = std::env::var("LIAISON_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_owned());

    let result = tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().with_target(true))
        .try_init();
    // Already-initialized is fine (tests, embedders with their own setup).
    drop(result);
}
