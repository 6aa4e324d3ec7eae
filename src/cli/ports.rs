//! Check-ports command - offline port mapping validation

use super::CheckPortsArgs;
use crate::onion::validate_ports;
use anyhow::Result;

/// Run the check-ports command
pub fn run_check_ports(args: &CheckPortsArgs) -> Result<()> {
    let ports = validate_ports(&args.ports)?;
    for port in &ports {
        println!("✅ {:<24} Port={}", port.to_string(), port.to_wire());
    }
    Ok(())
}
