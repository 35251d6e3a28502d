use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Diagnostics go to stderr. `debug` (set by the SSHGUARD_DEBUG environment
/// variable) raises the default verbosity; `RUST_LOG` overrides everything
/// when present.
pub fn init(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}
