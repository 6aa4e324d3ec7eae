//! Onion service lifecycle
//!
//! Four service flavors share one lifecycle:
//! `Requested -> AwaitingResponse -> AwaitingUploads -> Ready`, and
//! `Ready -> Removed` through an explicit removal.
//!
//! - [`EphemeralOnionService`] / [`EphemeralAuthenticatedOnionService`]:
//!   created with `ADD_ONION`, keys held by Tor or the caller.
//! - [`FilesystemOnionService`] / [`FilesystemAuthenticatedOnionService`]:
//!   `HiddenServiceDir` entries in Tor's configuration, keys on disk.

pub mod auth;
pub mod ephemeral;
pub mod filesystem;
pub mod keys;
pub mod ports;
pub mod progress;
pub mod upload;

pub use auth::{AuthBasic, AuthConfig, AuthStealth, AuthType, AuthenticatedClient, ClientEntry};
pub use ephemeral::{EphemeralAuthenticatedOnionService, EphemeralOnionService};
pub use filesystem::{FilesystemAuthenticatedOnionService, FilesystemOnionService};
pub use keys::{KeyAlgorithm, KeyMaterial, KeyRequest};
pub use ports::{validate_ports, PortSpec};
pub use progress::ProgressObserver;
pub use upload::{DescriptorUploadTracker, UploadMode, UploadOutcome, UploadState};

use crate::error::{OnionError, Result};
use crate::tor::{Capabilities, ControlConnection, HiddenServiceStore};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Hostname file inside a hidden service directory
pub const HOSTNAME_FILE: &str = "hostname";
/// Stealth client keys file inside a hidden service directory
pub const CLIENT_KEYS_FILE: &str = "client_keys";

/// Service id and the hostname derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionServiceIdentity {
    service_id: String,
    hostname: String,
}

impl OnionServiceIdentity {
    pub fn from_service_id(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            hostname: format!("{}.onion", service_id),
        }
    }

    /// Accepts either `abc.onion` or a bare `abc`
    pub fn from_hostname(hostname: &str) -> Self {
        Self::from_service_id(hostname.trim().trim_end_matches(".onion"))
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Requested,
    AwaitingResponse,
    AwaitingUploads,
    Ready,
    Removed,
}

impl ServiceState {
    /// Removal is only defined for ready services
    pub(crate) fn check_removable(self, service: &str) -> Result<()> {
        match self {
            ServiceState::Ready => Ok(()),
            other => Err(OnionError::InvalidState(format!(
                "cannot remove {} while {:?}",
                service, other
            ))),
        }
    }
}

/// Which flavor of service to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Ephemeral,
    EphemeralAuth,
    Filesystem,
    FilesystemAuth,
}

impl ServiceKind {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, ServiceKind::Ephemeral | ServiceKind::EphemeralAuth)
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, ServiceKind::EphemeralAuth | ServiceKind::FilesystemAuth)
    }

    /// The filesystem flavor with the same auth behavior
    fn filesystem_equivalent(self) -> Self {
        if self.is_authenticated() {
            ServiceKind::FilesystemAuth
        } else {
            ServiceKind::Filesystem
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Ephemeral => "ephemeral",
            ServiceKind::EphemeralAuth => "ephemeral-auth",
            ServiceKind::Filesystem => "filesystem",
            ServiceKind::FilesystemAuth => "filesystem-auth",
        };
        f.write_str(name)
    }
}

/// Options shared by every creation path
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Ephemeral only
    pub key: KeyRequest,
    /// Onion service version (2 or 3); `None` lets Tor pick
    pub version: Option<u8>,
    /// Ephemeral only: keep the service after the control connection closes
    pub detach: bool,
    /// Ephemeral only: single-hop, non-anonymous service
    pub non_anonymous: bool,
    /// Wait for every descriptor replica instead of the first success
    pub await_all_uploads: bool,
    /// Wait for descriptor uploads before returning
    pub wait_for_upload: bool,
    /// Filesystem only: service directory; a temporary one is made if unset
    pub directory: Option<PathBuf>,
    /// Filesystem only
    pub group_readable: bool,
    pub progress: Option<ProgressObserver>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            key: KeyRequest::Generate,
            version: None,
            detach: false,
            non_anonymous: false,
            await_all_uploads: false,
            wait_for_upload: true,
            directory: None,
            group_readable: false,
            progress: None,
        }
    }
}

impl CreateOptions {
    pub(crate) fn upload_mode(&self) -> UploadMode {
        UploadMode::from_await_all(self.await_all_uploads)
    }

    /// Reject options that only make sense for `ADD_ONION` services
    pub(crate) fn check_filesystem(&self) -> Result<()> {
        let ephemeral_only = [
            (self.detach, "detach"),
            (self.key.is_discard(), "discard key"),
            (matches!(self.key, KeyRequest::Blob(_)), "caller-supplied key"),
            (self.non_anonymous, "non-anonymous"),
        ];
        match ephemeral_only.iter().find(|(set, _)| *set) {
            Some((_, name)) => Err(OnionError::Validation(format!(
                "{} is only supported for ephemeral onion services",
                name
            ))),
            None => Ok(()),
        }
    }

    /// Reject options that only make sense for filesystem services
    pub(crate) fn check_ephemeral(&self) -> Result<()> {
        if self.directory.is_some() {
            return Err(OnionError::Validation(
                "directory is only supported for filesystem onion services".to_string(),
            ));
        }
        if self.group_readable {
            return Err(OnionError::Validation(
                "group_readable is only supported for filesystem onion services".to_string(),
            ));
        }
        Ok(())
    }
}

/// Any of the four service flavors
#[derive(Debug)]
pub enum OnionService {
    Ephemeral(EphemeralOnionService),
    EphemeralAuthenticated(EphemeralAuthenticatedOnionService),
    Filesystem(FilesystemOnionService),
    FilesystemAuthenticated(FilesystemAuthenticatedOnionService),
}

impl OnionService {
    pub fn kind(&self) -> ServiceKind {
        match self {
            OnionService::Ephemeral(_) => ServiceKind::Ephemeral,
            OnionService::EphemeralAuthenticated(_) => ServiceKind::EphemeralAuth,
            OnionService::Filesystem(_) => ServiceKind::Filesystem,
            OnionService::FilesystemAuthenticated(_) => ServiceKind::FilesystemAuth,
        }
    }

    fn identity(&self) -> &OnionServiceIdentity {
        match self {
            OnionService::Ephemeral(s) => s.identity(),
            OnionService::EphemeralAuthenticated(s) => s.identity(),
            OnionService::Filesystem(s) => s.identity(),
            OnionService::FilesystemAuthenticated(s) => s.identity(),
        }
    }

    pub fn service_id(&self) -> &str {
        self.identity().service_id()
    }

    pub fn hostname(&self) -> &str {
        self.identity().hostname()
    }

    pub fn ports(&self) -> &[PortSpec] {
        match self {
            OnionService::Ephemeral(s) => s.ports(),
            OnionService::EphemeralAuthenticated(s) => s.ports(),
            OnionService::Filesystem(s) => s.ports(),
            OnionService::FilesystemAuthenticated(s) => s.ports(),
        }
    }

    pub fn state(&self) -> ServiceState {
        match self {
            OnionService::Ephemeral(s) => s.state(),
            OnionService::EphemeralAuthenticated(s) => s.state(),
            OnionService::Filesystem(s) => s.state(),
            OnionService::FilesystemAuthenticated(s) => s.state(),
        }
    }

    /// True for ephemeral services created with `Detach`
    pub fn is_detached(&self) -> bool {
        match self {
            OnionService::Ephemeral(s) => s.is_detached(),
            OnionService::EphemeralAuthenticated(s) => s.is_detached(),
            _ => false,
        }
    }

    /// Tear the service down. Filesystem services are removed from `store`.
    pub async fn remove(&mut self, store: &mut dyn HiddenServiceStore) -> Result<()> {
        match self {
            OnionService::Ephemeral(s) => s.remove().await,
            OnionService::EphemeralAuthenticated(s) => s.remove().await,
            OnionService::Filesystem(s) => s.remove(store).await,
            OnionService::FilesystemAuthenticated(s) => s.remove(store).await,
        }
    }
}

/// Create a service of the requested kind.
///
/// Ephemeral requests against a Tor too old for the needed `ADD_ONION`
/// features are created as the equivalent filesystem service instead, as
/// long as no ephemeral-only option was asked for.
pub async fn create_onion_service<S: AsRef<str>>(
    control: Arc<dyn ControlConnection>,
    store: &mut dyn HiddenServiceStore,
    kind: ServiceKind,
    ports: &[S],
    auth: Option<AuthConfig>,
    options: CreateOptions,
) -> Result<OnionService> {
    match (kind.is_authenticated(), &auth) {
        (true, None) => {
            return Err(OnionError::Validation(format!(
                "{} services require an auth configuration",
                kind
            )))
        },
        (false, Some(_)) => {
            return Err(OnionError::Validation(format!(
                "{} services do not take an auth configuration",
                kind
            )))
        },
        _ => {},
    }
    // Checked before the version gate: old Tor must not fall back to filesystem stealth
    if kind == ServiceKind::EphemeralAuth && matches!(auth, Some(AuthConfig::Stealth(_))) {
        return Err(OnionError::UnsupportedAuthType(format!(
            "{} authorization is not supported for ephemeral onion services",
            AuthType::Stealth
        )));
    }

    let kind = gate_by_version(control.version(), kind, auth.as_ref(), &options)?;

    let service = match (kind, auth) {
        (ServiceKind::Ephemeral, _) => {
            OnionService::Ephemeral(EphemeralOnionService::create(control, ports, options).await?)
        },
        (ServiceKind::EphemeralAuth, Some(auth)) => OnionService::EphemeralAuthenticated(
            EphemeralAuthenticatedOnionService::create(control, ports, auth, options).await?,
        ),
        (ServiceKind::Filesystem, _) => OnionService::Filesystem(
            FilesystemOnionService::create(control.as_ref(), store, ports, options).await?,
        ),
        (ServiceKind::FilesystemAuth, Some(auth)) => OnionService::FilesystemAuthenticated(
            FilesystemAuthenticatedOnionService::create(control.as_ref(), store, ports, auth, options)
                .await?,
        ),
        (kind, None) => {
            return Err(OnionError::Validation(format!(
                "{} services require an auth configuration",
                kind
            )))
        },
    };
    Ok(service)
}

/// Pick the kind to actually create given the Tor version
fn gate_by_version(
    version: &str,
    kind: ServiceKind,
    auth: Option<&AuthConfig>,
    options: &CreateOptions,
) -> Result<ServiceKind> {
    if !kind.is_ephemeral() {
        return Ok(kind);
    }

    let caps = Capabilities::from_version_string(version);
    let missing = if !caps.add_onion {
        Some("ADD_ONION")
    } else if options.version == Some(3) && !caps.add_onion_v3 {
        Some("ED25519-V3 keys on ADD_ONION")
    } else if kind.is_authenticated() && !caps.add_onion_client_auth {
        Some("client auth on ADD_ONION")
    } else {
        None
    };
    let Some(missing) = missing else {
        return Ok(kind);
    };

    if auth.is_some_and(AuthConfig::has_supplied_tokens) {
        return Err(OnionError::Validation(format!(
            "Tor {} lacks {} and caller-supplied client tokens have no filesystem equivalent",
            version, missing
        )));
    }
    options.check_filesystem().map_err(|e| {
        OnionError::Validation(format!(
            "Tor {} lacks {} and cannot fall back to a filesystem service: {}",
            version, missing, e
        ))
    })?;

    let fallback = kind.filesystem_equivalent();
    warn!(
        tor_version = %version,
        "Tor lacks {}, creating a {} service instead of {}",
        missing, fallback, kind
    );
    Ok(fallback)
}
