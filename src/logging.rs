//! Log sink setup.
//!
//! Events go to stderr through a compact `tracing-subscriber` formatter. The
//! level comes from `--debug`; `MODEL_IMAGE_LOG` (an `EnvFilter` directive
//! string such as `model_image::checkpoint=trace`) replaces it when set.

use anyhow::{anyhow, Result};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "MODEL_IMAGE_LOG";

/// Installs the process-wide subscriber at the given level.
pub type LogInit = Box<dyn FnOnce(Level) -> Result<()>>;

pub fn level_for(debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

pub fn init_stderr(level: Level) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| anyhow!("invalid {LOG_ENV} filter: {e}"))?,
        _ => EnvFilter::new(level.as_str().to_ascii_lowercase()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}
