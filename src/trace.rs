//! Process-wide tracing setup for host binaries.

use tracing_subscriber::EnvFilter;

/// Install a compact fmt subscriber. `RUST_LOG` overrides the default
/// filter; calling twice is a no-op so tests can share a process.
pub fn init_tracing(debug: bool) {
    let default_filter = if debug { "nubbybot=debug,info" } else { "nubbybot=info,warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
