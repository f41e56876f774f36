pub mod config;
pub mod psf;
pub mod run;
pub mod simulate;

use std::path::Path;

use anyhow::{Context, Result};
use aperture_core::config::BlindConfig;

/// Configuration from `path`, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<BlindConfig> {
    let config = match path {
        Some(path) => BlindConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => BlindConfig::default(),
    };
    Ok(config)
}
