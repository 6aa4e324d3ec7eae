//! Remove command - tear down an ephemeral onion service

use super::RemoveArgs;
use crate::config;
use crate::onion::ephemeral::del_onion;
use crate::onion::OnionServiceIdentity;
use crate::tor::control::TorController;
use anyhow::{Context, Result};
use std::path::Path;

/// Run the remove command
pub async fn run_remove(config_path: Option<&Path>, args: &RemoveArgs) -> Result<()> {
    let tor = match config_path {
        Some(path) => config::load_from_path(path)?.tor,
        None => config::TorConfig::default(),
    };
    let identity = OnionServiceIdentity::from_hostname(&args.service_id);

    let control = TorController::connect(&tor)
        .await
        .context("Failed to connect to Tor control port")?;
    del_onion(&control, identity.service_id())
        .await
        .with_context(|| format!("Failed to remove {}", identity.hostname()))?;

    println!("🗑️  Removed {}", identity.hostname());
    Ok(())
}
