use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter directive: `warn` for dependencies, `info` for this crate,
/// `debug` for this crate when `debug` is set. `RUST_LOG` replaces it entirely.
pub fn default_directive(debug: bool) -> &'static str {
    if debug { "warn,mitrerag=debug" } else { "warn,mitrerag=info" }
}

/// Install the global subscriber. Logs go to stderr so chat output on
/// stdout stays clean.
pub fn init(debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;

    Ok(())
}
