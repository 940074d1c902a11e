use crate::error::Error;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a verbosity such as `DEBUG`, `INFO`, `WARN` or `ERROR`.
/// Case does not matter, `TRACE` is accepted as well.
pub fn parse_level(level: &str) -> Result<Level, Error> {
    Level::from_str(level.trim())
        .map_err(|_| Error::InvalidConfig(format!("unknown log level {level:?}")))
}

/// Install the global fmt subscriber.
///
/// A `RUST_LOG` directive in the environment wins over `level` so a single
/// module can be turned up on site without touching the config file.
///
/// * `level`: verbosity from the component config.
pub fn init(level: &str) -> Result<(), Error> {
    let level = parse_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::InvalidConfig(format!("logging already initialised: {e}")))
}
