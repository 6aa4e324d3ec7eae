//! Filesystem hidden service configuration
//!
//! Filesystem onion services live in Tor's own configuration. The store
//! keeps the ordered list of `HiddenServiceDir` blocks and applies all of
//! them at once with `SETCONF`, since Tor replaces the whole group. It is
//! seeded from `GETCONF HiddenServiceOptions` so services Tor already has
//! survive every save.

use super::control::escape_tor_string;
use super::ControlConnection;
use crate::error::{OnionError, Result};
use crate::onion::auth::AuthType;
use crate::onion::ports::PortSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One `HiddenServiceDir` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenServiceEntry {
    pub directory: PathBuf,
    pub ports: Vec<PortSpec>,
    pub version: Option<u8>,
    /// `HiddenServiceAuthorizeClient` type and client names
    pub authorize_client: Option<(AuthType, Vec<String>)>,
    pub group_readable: bool,
    /// Options not modelled above, kept as Tor reported them
    pub extra: Vec<(String, String)>,
}

impl HiddenServiceEntry {
    pub fn new(directory: PathBuf, ports: Vec<PortSpec>, version: Option<u8>) -> Self {
        Self {
            directory,
            ports,
            version,
            authorize_client: None,
            group_readable: false,
            extra: Vec::new(),
        }
    }

    /// Render as `SETCONF` arguments
    pub fn config_args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "HiddenServiceDir=\"{}\"",
            escape_tor_string(&self.directory.to_string_lossy())
        )];
        for port in &self.ports {
            args.push(format!("HiddenServicePort=\"{}\"", port));
        }
        if let Some(version) = self.version {
            args.push(format!("HiddenServiceVersion={}", version));
        }
        if self.group_readable {
            args.push("HiddenServiceDirGroupReadable=1".to_string());
        }
        if let Some((auth_type, clients)) = &self.authorize_client {
            args.push(format!(
                "HiddenServiceAuthorizeClient=\"{} {}\"",
                auth_type,
                clients.join(",")
            ));
        }
        for (key, value) in &self.extra {
            args.push(format!("{}=\"{}\"", key, escape_tor_string(value)));
        }
        args
    }
}

/// The configuration collaborator filesystem services depend on
#[async_trait]
pub trait HiddenServiceStore: Send {
    /// Configured filesystem services, in order
    fn hidden_services(&mut self) -> &mut Vec<HiddenServiceEntry>;

    /// Apply pending changes to Tor; completes once applied
    async fn save(&mut self) -> Result<()>;
}

/// Store that applies its services over a control connection
pub struct ControlConfStore {
    control: Arc<dyn ControlConnection>,
    services: Vec<HiddenServiceEntry>,
}

impl ControlConfStore {
    /// Start from an empty list. Saving replaces whatever hidden services
    /// Tor already has; use [`ControlConfStore::load`] against a live Tor.
    pub fn new(control: Arc<dyn ControlConnection>) -> Self {
        Self {
            control,
            services: Vec::new(),
        }
    }

    /// Start from the hidden services Tor is currently configured with
    pub async fn load(control: Arc<dyn ControlConnection>) -> Result<Self> {
        let reply = control.send_command("GETCONF HiddenServiceOptions").await?;
        let services = parse_hidden_service_options(&reply)?;
        debug!(services = services.len(), "Loaded existing hidden service configuration");
        Ok(Self { control, services })
    }

    /// Build the command that applies the current service list
    pub fn apply_command(&self) -> String {
        if self.services.is_empty() {
            return "RESETCONF HiddenServiceDir".to_string();
        }
        let args: Vec<String> = self
            .services
            .iter()
            .flat_map(HiddenServiceEntry::config_args)
            .collect();
        format!("SETCONF {}", args.join(" "))
    }
}

#[async_trait]
impl HiddenServiceStore for ControlConfStore {
    fn hidden_services(&mut self) -> &mut Vec<HiddenServiceEntry> {
        &mut self.services
    }

    async fn save(&mut self) -> Result<()> {
        let cmd = self.apply_command();
        debug!(services = self.services.len(), "Applying hidden service configuration");

        let reply = self.control.send_command(&cmd).await?;
        if reply.trim() != "OK" {
            return Err(OnionError::Control(format!(
                "unexpected reply to hidden service configuration: {}",
                reply
            )));
        }
        info!(
            services = self.services.len(),
            "Hidden service configuration applied"
        );
        Ok(())
    }
}

/// Parse a `GETCONF HiddenServiceOptions` reply into service blocks
pub fn parse_hidden_service_options(reply: &str) -> Result<Vec<HiddenServiceEntry>> {
    let mut entries: Vec<HiddenServiceEntry> = Vec::new();

    for line in reply.lines() {
        // A bare keyword means nothing is configured
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value);

        if key == "HiddenServiceDir" {
            entries.push(HiddenServiceEntry::new(PathBuf::from(value), Vec::new(), None));
            continue;
        }
        let Some(entry) = entries.last_mut() else {
            return Err(OnionError::MalformedResponse(format!(
                "{} appears before any HiddenServiceDir",
                key
            )));
        };

        match key {
            "HiddenServicePort" => match PortSpec::parse(&value) {
                Ok(port) => entry.ports.push(port),
                Err(_) => entry.extra.push((key.to_string(), value)),
            },
            "HiddenServiceVersion" => match value.parse() {
                Ok(version) => entry.version = Some(version),
                Err(_) => entry.extra.push((key.to_string(), value)),
            },
            "HiddenServiceDirGroupReadable" => entry.group_readable = value == "1",
            "HiddenServiceAuthorizeClient" => match parse_authorize_client(&value) {
                Some(authorize) => entry.authorize_client = Some(authorize),
                None => entry.extra.push((key.to_string(), value)),
            },
            _ => entry.extra.push((key.to_string(), value)),
        }
    }
    Ok(entries)
}

/// `basic alice,bob` or `stealth carol`
fn parse_authorize_client(value: &str) -> Option<(AuthType, Vec<String>)> {
    let (auth_type, clients) = value.split_once(' ')?;
    let auth_type = match auth_type {
        "basic" => AuthType::Basic,
        "stealth" => AuthType::Stealth,
        _ => return None,
    };
    Some((auth_type, clients.split(',').map(str::to_string).collect()))
}

/// Undo the quoting GETCONF applies to values with special characters
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
                continue;
            }
        }
        out.push(c);
    }
    out
}
