//! Tracing subscriber setup for hosts embedding the crate.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs a global subscriber that writes to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Stdout is left
/// untouched so a host can use it for its own protocol. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
