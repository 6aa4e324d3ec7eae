//! rustonion - onion service lifecycle over the Tor control port
//!
//! # Usage
//!
//! ```bash
//! # Create every service in the config, remove them again on Ctrl-C
//! rustonion -c rustonion.toml up
//!
//! # Remove an ephemeral service left behind with detach = true
//! rustonion remove abcdefghijklmnop
//!
//! # Check port mappings without touching Tor
//! rustonion check-ports "80 127.0.0.1:8080"
//! ```

use anyhow::Result;
use clap::Parser;
use rustonion::cli::{self, Cli, Commands};
use rustonion::logging;
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        logging::init_with_level(Level::DEBUG);
    } else {
        logging::init();
    }

    match &cli.command {
        Commands::Up(args) => {
            cli::run_up(cli.config.as_deref(), args).await?;
        },
        Commands::Remove(args) => {
            cli::run_remove(cli.config.as_deref(), args).await?;
        },
        Commands::CheckPorts(args) => {
            cli::run_check_ports(args)?;
        },
    }

    Ok(())
}
