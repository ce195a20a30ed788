//! Logging for SentinelVote.
//!
//! Logs go through `tracing` to `stdout`. The server's own events are shown at
//! the configured level along with request traces; SQLx is capped at `warn`
//! because it logs every statement. Directives in `RUST_LOG` are applied last
//! and win over the defaults (see [`EnvFilter`]).

use tracing::Level;
use tracing_subscriber::{filter::ParseError, prelude::*, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Sets up logging for the application. Call this early in the process
/// lifecycle to ensure logs are not silently ignored.
pub fn setup(config: &Config) -> color_eyre::Result<()> {
    color_eyre::install()?;
    let overrides = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::registry()
        .with(env_filter(config.log_level, &overrides)?)
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();
    Ok(())
}

/// Builds the filter for `level`, then applies the comma-separated
/// `overrides`. Overrides that do not parse are skipped.
pub fn env_filter(level: Level, overrides: &str) -> Result<EnvFilter, ParseError> {
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    let mut filter = EnvFilter::default()
        .add_directive(format!("{crate_name}={level}").parse()?)
        .add_directive(format!("tower_http={level}").parse()?)
        .add_directive("sqlx=warn".parse()?);

    for directive in overrides.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    Ok(filter)
}
