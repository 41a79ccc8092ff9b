//! Tracing subscriber setup.

use crate::Verbosity;
use anyhow::{Context, Result, anyhow};
use tracing_subscriber::filter::EnvFilter;

const DEFAULT_LEVEL: &str = "warn";

/// Directive used when `RUST_LOG` is unset.
fn default_directive(configured: Option<&str>, verbosity: Verbosity) -> String {
    match verbosity {
        Verbosity::Quiet => "error".into(),
        Verbosity::Verbose => "debug".into(),
        Verbosity::Normal => configured.unwrap_or(DEFAULT_LEVEL).into(),
    }
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the configured level and the verbosity flags.
pub fn init(configured: Option<&str>, verbosity: Verbosity) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(configured, verbosity)))
        .context("failed to configure tracing level")?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
