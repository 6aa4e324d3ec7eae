//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Default config file locations
const CONFIG_PATHS: &[&str] = &["./rustonion.toml", "/etc/rustonion/config.toml"];

/// Load configuration from `path`, or the first default location that exists
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None => load_from_path(&find_config_file()?),
    }
}

/// Find first existing config file
fn find_config_file() -> Result<std::path::PathBuf> {
    for path in CONFIG_PATHS {
        if Path::new(path).exists() {
            return Ok(Path::new(path).to_path_buf());
        }
    }
    anyhow::bail!("No configuration file found. Tried: {:?}", CONFIG_PATHS)
}

/// Load and parse config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse(&contents)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    Ok(config)
}

/// Parse and validate config text
pub fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("Failed to parse config")?;
    super::validate(&config)?;
    Ok(config)
}
