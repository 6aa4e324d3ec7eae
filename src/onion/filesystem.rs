//! Filesystem onion services (`HiddenServiceDir`)
//!
//! The service is registered with a [`HiddenServiceStore`], Tor writes the
//! key and `hostname` files into the directory, and the service id is read
//! back from there.

use super::auth::{
    parse_client_keys, parse_hostname_file, AuthConfig, AuthType, AuthenticatedClient,
    ClientRegistry, HostnameEntry,
};
use super::keys::{KeyMaterial, LazyKey};
use super::ports::{validate_ports, PortSpec};
use super::progress::{Progress, CREATED_PERCENT};
use super::upload::await_descriptor_upload;
use super::{CreateOptions, OnionServiceIdentity, ServiceState, CLIENT_KEYS_FILE, HOSTNAME_FILE};
use crate::error::{OnionError, Result};
use crate::tor::{ControlConnection, HiddenServiceEntry, HiddenServiceStore, HS_DESC_EVENT};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TEMP_DIR_PREFIX: &str = "rustonion-hs-";

/// Create the service directory, or a kept temporary one
fn prepare_directory(directory: Option<&Path>, group_readable: bool) -> Result<PathBuf> {
    let dir = match directory {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir.to_path_buf()
        },
        None => tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()?
            .keep(),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if group_readable { 0o750 } else { 0o700 };
        fs::set_permissions(&dir, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = group_readable;

    Ok(dir)
}

fn read_hostname_entries(dir: &Path) -> Result<Vec<HostnameEntry>> {
    let contents = fs::read_to_string(dir.join(HOSTNAME_FILE))?;
    Ok(parse_hostname_file(&contents))
}

fn check_version(version: Option<u8>) -> Result<()> {
    match version {
        None | Some(2) | Some(3) => Ok(()),
        Some(other) => Err(OnionError::UnsupportedVersion(format!(
            "filesystem onion services support versions 2 and 3, not {}",
            other
        ))),
    }
}

/// Drop the entry for `dir` and re-apply the configuration
async fn unregister(store: &mut dyn HiddenServiceStore, dir: &Path) -> Result<()> {
    let services = store.hidden_services();
    let before = services.len();
    services.retain(|entry| entry.directory != dir);
    if services.len() == before {
        return Err(OnionError::RemovalFailed(format!(
            "no hidden service configured for {}",
            dir.display()
        )));
    }
    store.save().await
}

/// What a successful registration hands back to the variant
struct Registered {
    directory: PathBuf,
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    entries: Vec<HostnameEntry>,
}

/// Register a `HiddenServiceDir`, read back its identity, then wait for
/// descriptor upload
async fn register<S: AsRef<str>>(
    control: &dyn ControlConnection,
    store: &mut dyn HiddenServiceStore,
    ports: &[S],
    authorize_client: Option<(AuthType, Vec<String>)>,
    options: &CreateOptions,
) -> Result<Registered> {
    let ports = validate_ports(ports)?;
    options.check_filesystem()?;
    check_version(options.version)?;
    if let Some(dir) = options.directory.as_deref() {
        if store.hidden_services().iter().any(|s| s.directory.as_path() == dir) {
            return Err(OnionError::Validation(format!(
                "{} is already configured as a hidden service directory",
                dir.display()
            )));
        }
    }

    let directory = prepare_directory(options.directory.as_deref(), options.group_readable)?;
    let mut progress = Progress::new(options.progress.clone());
    let mut state = ServiceState::Requested;
    debug!(?state, directory = %directory.display(), "Creating filesystem onion service");

    let mut entry = HiddenServiceEntry::new(directory.clone(), ports.clone(), options.version);
    entry.authorize_client = authorize_client;
    entry.group_readable = options.group_readable;

    // Subscribe before applying: uploads can start as soon as Tor has the config
    let subscription = if options.wait_for_upload {
        Some(control.subscribe(HS_DESC_EVENT).await?)
    } else {
        None
    };

    state = ServiceState::AwaitingResponse;
    debug!(?state, "Applying hidden service configuration");
    store.hidden_services().push(entry);

    let applied = match store.save().await {
        Ok(()) => read_hostname_entries(&directory).and_then(|entries| {
            let first = entries.first().ok_or_else(|| {
                OnionError::MalformedResponse(format!(
                    "{} has no hostname",
                    directory.join(HOSTNAME_FILE).display()
                ))
            })?;
            let identity = OnionServiceIdentity::from_hostname(&first.hostname);
            Ok((identity, entries))
        }),
        Err(e) => {
            store.hidden_services().retain(|s| s.directory != directory);
            Err(e)
        },
    };

    let (identity, entries) = match applied {
        Ok(applied) => applied,
        Err(e) => {
            if let Some(subscription) = subscription {
                if let Err(unsub) = control.unsubscribe(subscription).await {
                    warn!("Failed to unsubscribe from HS_DESC events: {}", unsub);
                }
            }
            if store.hidden_services().iter().any(|s| s.directory == directory) {
                if let Err(cleanup) = unregister(store, &directory).await {
                    warn!(directory = %directory.display(), "Cleanup failed: {}", cleanup);
                }
            }
            return Err(e);
        },
    };

    info!(
        onion_address = %identity.hostname(),
        directory = %directory.display(),
        "Created filesystem onion service"
    );
    progress.report(
        CREATED_PERCENT,
        "created",
        &format!("Created onion service {}", identity.hostname()),
    );

    if let Some(subscription) = subscription {
        state = ServiceState::AwaitingUploads;
        debug!(?state, service_id = %identity.service_id(), "Waiting for descriptor upload");
        if let Err(e) = await_descriptor_upload(
            control,
            subscription,
            identity.service_id(),
            options.upload_mode(),
            &mut progress,
        )
        .await
        {
            if let Err(cleanup) = unregister(store, &directory).await {
                warn!(directory = %directory.display(), "Cleanup after failed upload failed: {}", cleanup);
            }
            return Err(e);
        }
    }

    Ok(Registered {
        directory,
        identity,
        ports,
        entries,
    })
}

/// A `HiddenServiceDir` service without client authorization
#[derive(Debug)]
pub struct FilesystemOnionService {
    directory: PathBuf,
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    version: Option<u8>,
    key: LazyKey,
    state: ServiceState,
}

impl FilesystemOnionService {
    pub async fn create<S: AsRef<str>>(
        control: &dyn ControlConnection,
        store: &mut dyn HiddenServiceStore,
        ports: &[S],
        options: CreateOptions,
    ) -> Result<Self> {
        let registered = register(control, store, ports, None, &options).await?;
        Ok(Self {
            directory: registered.directory,
            identity: registered.identity,
            ports: registered.ports,
            version: options.version,
            key: LazyKey::new(),
            state: ServiceState::Ready,
        })
    }

    pub fn identity(&self) -> &OnionServiceIdentity {
        &self.identity
    }

    pub fn service_id(&self) -> &str {
        self.identity.service_id()
    }

    pub fn hostname(&self) -> &str {
        self.identity.hostname()
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Point later key reads at `directory`. Existing files are not moved.
    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
        self.key.reset();
    }

    /// Service key, read from the directory on first access
    pub fn private_key(&self) -> Result<&KeyMaterial> {
        self.key.get(&self.directory, self.version)
    }

    /// Remove the service from Tor's configuration. Key files stay on disk.
    pub async fn remove(&mut self, store: &mut dyn HiddenServiceStore) -> Result<()> {
        self.state.check_removable(self.identity.hostname())?;
        unregister(store, &self.directory).await?;
        info!(service_id = %self.identity.service_id(), "Removed filesystem onion service");
        self.state = ServiceState::Removed;
        Ok(())
    }
}

/// A `HiddenServiceDir` service with basic or stealth client authorization
#[derive(Debug)]
pub struct FilesystemAuthenticatedOnionService {
    directory: PathBuf,
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    version: Option<u8>,
    auth_type: AuthType,
    declared: Vec<String>,
    key: LazyKey,
    state: ServiceState,
}

impl FilesystemAuthenticatedOnionService {
    /// Create the service. Tor generates every client token, so tokens in
    /// `auth` are rejected.
    pub async fn create<S: AsRef<str>>(
        control: &dyn ControlConnection,
        store: &mut dyn HiddenServiceStore,
        ports: &[S],
        auth: AuthConfig,
        options: CreateOptions,
    ) -> Result<Self> {
        if auth.has_supplied_tokens() {
            return Err(OnionError::Validation(
                "client tokens cannot be supplied for filesystem onion services".to_string(),
            ));
        }
        let auth_type = auth.auth_type();
        let declared = auth.client_names();

        let registered = register(
            control,
            store,
            ports,
            Some((auth_type, declared.clone())),
            &options,
        )
        .await?;
        debug!(
            clients = registered.entries.len(),
            "Hostname file lists authorized clients"
        );

        Ok(Self {
            directory: registered.directory,
            identity: registered.identity,
            ports: registered.ports,
            version: options.version,
            auth_type,
            declared,
            key: LazyKey::new(),
            state: ServiceState::Ready,
        })
    }

    pub fn identity(&self) -> &OnionServiceIdentity {
        &self.identity
    }

    pub fn service_id(&self) -> &str {
        self.identity.service_id()
    }

    pub fn hostname(&self) -> &str {
        self.identity.hostname()
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
        self.key.reset();
    }

    pub fn private_key(&self) -> Result<&KeyMaterial> {
        self.key.get(&self.directory, self.version)
    }

    /// Declared client names, in declaration order
    pub fn client_names(&self) -> &[String] {
        &self.declared
    }

    /// Look a client up in the hostname file
    pub fn get_client(&self, name: &str) -> Result<AuthenticatedClient> {
        let entries = read_hostname_entries(&self.directory)?;
        match entries.iter().find(|e| e.client.as_deref() == Some(name)) {
            Some(entry) => self.client_from_entry(name, entry),
            None if self.declared.iter().any(|d| d == name) => {
                Err(OnionError::ExpectedClientMissing(name.to_string()))
            },
            None => Err(OnionError::ClientNotFound(name.to_string())),
        }
    }

    /// Every declared client; fails if any is missing from the hostname file
    pub fn clients(&self) -> Result<ClientRegistry> {
        let entries = read_hostname_entries(&self.directory)?;
        let mut registry = ClientRegistry::new();
        for name in &self.declared {
            let entry = entries
                .iter()
                .find(|e| e.client.as_deref() == Some(name.as_str()))
                .ok_or_else(|| OnionError::ExpectedClientMissing(name.clone()))?;
            registry.insert(self.client_from_entry(name, entry)?)?;
        }
        Ok(registry)
    }

    /// Private key a client needs: its own key for stealth auth, the
    /// service key for basic auth
    pub fn client_private_key(&self, name: &str) -> Result<Option<KeyMaterial>> {
        match self.auth_type {
            AuthType::Basic => {
                if !self.declared.iter().any(|d| d == name) {
                    return Err(OnionError::ClientNotFound(name.to_string()));
                }
                let key = self.private_key()?;
                Ok((!key.is_absent()).then(|| key.clone()))
            },
            AuthType::Stealth => {
                let contents = fs::read_to_string(self.directory.join(CLIENT_KEYS_FILE))?;
                let entry = parse_client_keys(&contents)?
                    .into_iter()
                    .find(|c| c.name == name)
                    .ok_or_else(|| OnionError::ClientNotFound(name.to_string()))?;
                Ok(entry.key)
            },
        }
    }

    fn client_from_entry(&self, name: &str, entry: &HostnameEntry) -> Result<AuthenticatedClient> {
        let key = match self.auth_type {
            AuthType::Basic => None,
            AuthType::Stealth => self.client_private_key(name)?,
        };
        Ok(AuthenticatedClient {
            name: name.to_string(),
            auth_token: entry.token.clone(),
            key,
            hostname: entry.hostname.clone(),
            ports: self.ports.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
            parent: self.directory.to_string_lossy().into_owned(),
            version: self.version,
        })
    }

    pub async fn remove(&mut self, store: &mut dyn HiddenServiceStore) -> Result<()> {
        self.state.check_removable(self.identity.hostname())?;
        unregister(store, &self.directory).await?;
        info!(service_id = %self.identity.service_id(), "Removed filesystem onion service");
        self.state = ServiceState::Removed;
        Ok(())
    }
}
