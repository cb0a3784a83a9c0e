//! Tunnox Logging
//!
//! One place to initialize `tracing-subscriber` the same way across
//! every binary, so library crates only ever call the `tracing` macros
//! and never touch a subscriber themselves.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a global subscriber: `RUST_LOG` if set, else
/// `info,tunnox=debug`. Panics if a subscriber is already installed —
/// call this exactly once, at the top of `main`.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tunnox=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
