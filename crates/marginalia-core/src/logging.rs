//! Optional file logging for hosts
//!
//! The library only emits `tracing` events. A host that has no subscriber of
//! its own can call [`init_logging`] to write them to the configured log
//! file. Calling it more than once is harmless.

use std::fs::{self, OpenOptions};

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Install a file-backed `tracing` subscriber for this crate
///
/// Returns `Ok(false)` if another subscriber was already installed.
pub fn init_logging(config: &Config) -> Result<bool> {
    let log_path = config.log_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Could not open log file {:?}", log_path))?;

    let env_filter = EnvFilter::try_new(format!("marginalia_core={}", config.log_level))
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init()
        .is_ok();

    if installed {
        info!("Annotation logging initialized to {:?}", log_path);
    }
    Ok(installed)
}
