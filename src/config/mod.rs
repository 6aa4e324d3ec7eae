//! Configuration loading and validation
//!
//! A TOML file names the Tor control port to use and the onion services to
//! create. Configuration is immutable after load.

pub mod file;
mod validation;

pub use file::{load_config, load_from_path};
pub use validation::validate;

use crate::onion::{
    AuthBasic, AuthConfig, AuthStealth, AuthType, ClientEntry, CreateOptions, KeyRequest, PortSpec,
    ServiceKind,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Tor daemon connection
#[derive(Debug, Clone, Deserialize)]
pub struct TorConfig {
    #[serde(default = "default_control_host")]
    pub control_host: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    pub control_password: Option<String>,
    /// Cookie file tried before the well-known locations
    pub cookie_path: Option<PathBuf>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            control_host: default_control_host(),
            control_port: default_control_port(),
            control_password: None,
            cookie_path: None,
        }
    }
}

fn default_control_host() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    9051
}

/// One onion service to create
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub kind: ServiceKind,
    /// List of `"<external> <ip>:<port>"` strings; kept raw so the shape is
    /// checked too
    pub ports: toml::Value,
    /// Onion service version (2 or 3)
    pub version: Option<u8>,
    /// Filesystem kinds: service directory
    pub directory: Option<PathBuf>,
    /// Ephemeral kinds: existing key blob (`RSA1024:...` / `ED25519-V3:...`)
    pub key: Option<String>,
    #[serde(default)]
    pub discard_key: bool,
    #[serde(default)]
    pub detach: bool,
    #[serde(default)]
    pub await_all_uploads: bool,
    #[serde(default = "default_wait_for_upload")]
    pub wait_for_upload: bool,
    #[serde(default)]
    pub non_anonymous: bool,
    #[serde(default)]
    pub group_readable: bool,
    pub auth: Option<AuthSection>,
}

fn default_wait_for_upload() -> bool {
    true
}

/// `[services.auth]`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub clients: Vec<ClientSpec>,
}

/// A client as written in the file: `"alice"` or `{ name = "bob", token = "..." }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientSpec {
    Name(String),
    WithToken { name: String, token: Option<String> },
}

impl From<&ClientSpec> for ClientEntry {
    fn from(spec: &ClientSpec) -> Self {
        match spec {
            ClientSpec::Name(name) => ClientEntry::from(name.as_str()),
            ClientSpec::WithToken { name, token } => ClientEntry {
                name: name.clone(),
                token: token.clone(),
            },
        }
    }
}

impl AuthSection {
    pub fn to_auth_config(&self) -> Result<AuthConfig> {
        let entries = self.clients.iter().map(ClientEntry::from);
        let auth = match self.auth_type {
            AuthType::Basic => AuthConfig::from(AuthBasic::new(entries)?),
            AuthType::Stealth => AuthConfig::from(AuthStealth::new(entries)?),
        };
        Ok(auth)
    }
}

/// Everything needed to create one service
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub kind: ServiceKind,
    pub ports: Vec<PortSpec>,
    pub auth: Option<AuthConfig>,
    pub options: CreateOptions,
}

impl ServiceConfig {
    pub fn port_specs(&self) -> Result<Vec<PortSpec>> {
        crate::onion::ports::validate_ports_value(&self.ports).context("invalid ports")
    }

    pub fn key_request(&self) -> KeyRequest {
        match (&self.key, self.discard_key) {
            (Some(blob), _) => KeyRequest::Blob(blob.clone()),
            (None, true) => KeyRequest::Discard,
            (None, false) => KeyRequest::Generate,
        }
    }

    /// Convert to the arguments of `create_onion_service`
    pub fn to_request(&self) -> Result<ServiceRequest> {
        let ports = self.port_specs()?;
        let auth = self
            .auth
            .as_ref()
            .map(AuthSection::to_auth_config)
            .transpose()?;

        let options = CreateOptions {
            key: self.key_request(),
            version: self.version,
            detach: self.detach,
            non_anonymous: self.non_anonymous,
            await_all_uploads: self.await_all_uploads,
            wait_for_upload: self.wait_for_upload,
            directory: self.directory.clone(),
            group_readable: self.group_readable,
            progress: None,
        };

        Ok(ServiceRequest {
            kind: self.kind,
            ports,
            auth,
            options,
        })
    }
}

impl ServiceRequest {
    /// Ports in the string form accepted by the creation functions
    pub fn port_strings(&self) -> Vec<String> {
        self.ports.iter().map(ToString::to_string).collect()
    }
}

