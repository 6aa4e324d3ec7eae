//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::{Config, ServiceConfig};
use crate::onion::keys::validate_key_blob;
use crate::onion::{AuthType, ServiceKind};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_tor(config)?;
    for (idx, service) in config.services.iter().enumerate() {
        validate_service(service).with_context(|| format!("services[{}] ({})", idx, service.kind))?;
    }
    validate_directories(config)?;
    Ok(())
}

fn validate_tor(config: &Config) -> Result<()> {
    if config.tor.control_host.is_empty() {
        bail!("tor.control_host cannot be empty");
    }
    if config.tor.control_port == 0 {
        bail!("tor.control_port cannot be 0");
    }
    Ok(())
}

fn validate_service(service: &ServiceConfig) -> Result<()> {
    service.port_specs()?;

    match service.version {
        None | Some(2) | Some(3) => {},
        Some(other) => bail!("version must be 2 or 3, not {}", other),
    }

    validate_auth(service)?;

    let request = service.to_request()?;
    if service.kind.is_ephemeral() {
        request.options.check_ephemeral()?;
        if service.key.is_some() && service.discard_key {
            bail!("key and discard_key are mutually exclusive");
        }
        if let Some(blob) = &service.key {
            validate_key_blob(blob, service.version)?;
        }
    } else {
        request.options.check_filesystem()?;
    }
    Ok(())
}

fn validate_auth(service: &ServiceConfig) -> Result<()> {
    let Some(auth) = &service.auth else {
        if service.kind.is_authenticated() {
            bail!("{} services need an [auth] section", service.kind);
        }
        return Ok(());
    };

    if !service.kind.is_authenticated() {
        bail!("{} services do not take an [auth] section", service.kind);
    }

    let auth_config = auth.to_auth_config()?;
    match (service.kind, auth.auth_type) {
        (ServiceKind::EphemeralAuth, AuthType::Stealth) => {
            bail!("stealth authorization is only available for filesystem-auth services")
        },
        (ServiceKind::FilesystemAuth, _) if auth_config.has_supplied_tokens() => {
            bail!("client tokens cannot be set for filesystem-auth services")
        },
        _ => {},
    }
    Ok(())
}

fn validate_directories(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for dir in config.services.iter().filter_map(|s| s.directory.as_ref()) {
        if !seen.insert(dir) {
            bail!("directory {:?} is used by more than one service", dir);
        }
    }
    Ok(())
}
