//! Command-line interface for rustonion
//!
//! Provides main commands:
//! - `up` - Create every configured onion service, remove them on Ctrl-C
//! - `remove` - Remove an ephemeral onion service by service id
//! - `check-ports` - Validate port mappings offline

mod ports;
mod remove;
mod up;

pub use ports::run_check_ports;
pub use remove::run_remove;
pub use up::run_up;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rustonion - Tor onion service lifecycle over the control port
#[derive(Parser, Debug)]
#[command(name = "rustonion")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the configured onion services and keep them until Ctrl-C
    Up(UpArgs),

    /// Remove an ephemeral onion service
    Remove(RemoveArgs),

    /// Validate port mappings without connecting to Tor
    CheckPorts(CheckPortsArgs),
}

/// Arguments for up command
#[derive(Parser, Debug)]
pub struct UpArgs {
    /// Give up on a service whose descriptor is not uploaded in time
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Leave the services running on exit
    #[arg(long, default_value_t = false)]
    pub keep: bool,
}

/// Arguments for remove command
#[derive(Parser, Debug)]
pub struct RemoveArgs {
    /// Service id or .onion hostname
    pub service_id: String,
}

/// Arguments for check-ports command
#[derive(Parser, Debug)]
pub struct CheckPortsArgs {
    /// Port mappings such as "80 127.0.0.1:8080"
    #[arg(required = true)]
    pub ports: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_up() {
        let cli = Cli::try_parse_from(["rustonion", "-c", "x.toml", "-v", "up", "--timeout-secs", "30"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Up(args) => assert_eq!(args.timeout_secs, Some(30)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_check_ports() {
        let cli = Cli::try_parse_from(["rustonion", "check-ports", "80 127.0.0.1:8080"]).unwrap();
        match cli.command {
            Commands::CheckPorts(args) => assert_eq!(args.ports, vec!["80 127.0.0.1:8080"]),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["rustonion", "check-ports"]).is_err());
    }
}
