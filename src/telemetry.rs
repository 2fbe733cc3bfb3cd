use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber
///
/// With `enabled`, log lines are appended to `log_path`; otherwise they go to
/// stdout. `RUST_LOG` overrides the default `info` filter either way.
///
/// # Errors
/// Returns error if the log file or its parent directory cannot be created
pub fn init(enabled: bool, log_path: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !enabled {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        return Ok(());
    }

    let expanded = crate::config::expand_path(log_path)?;

    if let Some(parent) = expanded.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .init();

    tracing::info!("logging to {}", expanded.display());

    Ok(())
}
