//! CLI command implementations.

pub mod build;
pub mod pages;
pub mod serve;

pub use build::build_site;
pub use pages::{list_pages, PagesOptions};
pub use serve::serve;

use anyhow::{Context, Result};
use pagewright_core::{BuildMode, Config};
use std::path::Path;

/// Load the site configuration, applying a mode override
pub fn load_config(path: &Path, mode: Option<BuildMode>) -> Result<Config> {
    tracing::debug!("Loading config from {:?}", path);
    let mut config = Config::load_or_default(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(mode) = mode {
        config.mode = mode;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
