//! Log setup for the splash binary.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `log_level`, an `EnvFilter` directive
/// string such as `"info,splashnet=debug"`.
pub fn init(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|e| {
        eprintln!("Invalid log level {:?} ({}), using info", log_level, e);
        EnvFilter::new("info")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(())
}
