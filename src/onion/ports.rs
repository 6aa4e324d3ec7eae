//! Port mapping validation
//!
//! User-facing port strings look like `"80 127.0.0.1:8080"`: the external
//! (onion) port, one space, then a local `IP:port` target. Targets must be
//! loopback or private-range IPv4 literals; hostnames are never accepted.

use crate::error::{OnionError, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// One validated port mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    /// Port clients connect to on the .onion address
    pub external_port: u16,
    /// Local address Tor forwards connections to
    pub local_host: Ipv4Addr,
    /// Local port Tor forwards connections to
    pub local_port: u16,
}

impl PortSpec {
    /// Parse a single `"<external> <ip>:<port>"` string
    pub fn parse(port: &str) -> Result<Self> {
        let parts: Vec<&str> = port.split(' ').collect();
        if parts.len() != 2 {
            return Err(invalid(port, "should have exactly one space in it"));
        }
        let (external, local) = (parts[0], parts[1]);

        let target: Vec<&str> = local.split(':').collect();
        if target.len() != 2 {
            return Err(invalid(port, "local address should be IP:port"));
        }
        let (host, local_port) = (target[0], target[1]);

        let external_port: u16 = external
            .parse()
            .map_err(|_| invalid(port, "external port isn't an int"))?;

        let local_host = match host.parse::<Ipv4Addr>() {
            Ok(ip) if ip.is_loopback() || ip.is_private() => ip,
            _ => {
                return Err(invalid(
                    port,
                    &format!("internal IP '{}' should be a local address", host),
                ))
            },
        };

        let local_port: u16 = local_port
            .parse()
            .map_err(|_| invalid(port, "local port isn't an int"))?;

        Ok(Self {
            external_port,
            local_host,
            local_port,
        })
    }

    /// Parse the control-protocol form `"<external>,<ip>:<port>"`
    pub fn from_wire(wire: &str) -> Result<Self> {
        match wire.split_once(',') {
            Some((external, local)) => Self::parse(&format!("{} {}", external, local)),
            None => Err(invalid(wire, "wire form should be EXTERNAL,IP:port")),
        }
    }

    /// Render for an `ADD_ONION` `Port=` term
    pub fn to_wire(&self) -> String {
        format!(
            "{},{}:{}",
            self.external_port, self.local_host, self.local_port
        )
    }
}

/// Space-separated form, as used by `HiddenServicePort`
impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}",
            self.external_port, self.local_host, self.local_port
        )
    }
}

impl FromStr for PortSpec {
    type Err = OnionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Validate a list of port strings, preserving order
pub fn validate_ports<S: AsRef<str>>(ports: &[S]) -> Result<Vec<PortSpec>> {
    if ports.is_empty() {
        return Err(OnionError::InvalidPorts(
            "at least one port is required".to_string(),
        ));
    }
    ports.iter().map(|p| PortSpec::parse(p.as_ref())).collect()
}

/// Validate untyped user input (e.g. a config value) that should be a list
/// of port strings. Bare strings and nested lists are rejected.
pub fn validate_ports_value(value: &toml::Value) -> Result<Vec<PortSpec>> {
    let shape_error = || OnionError::InvalidPorts("ports must be a list of strings".to_string());

    let items = value.as_array().ok_or_else(shape_error)?;
    let ports = items
        .iter()
        .map(|item| item.as_str().ok_or_else(shape_error))
        .collect::<Result<Vec<&str>>>()?;

    validate_ports(&ports)
}

fn invalid(port: &str, reason: &str) -> OnionError {
    OnionError::InvalidPorts(format!("port '{}' {}", port, reason))
}
