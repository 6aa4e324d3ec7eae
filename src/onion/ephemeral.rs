//! Ephemeral onion services (`ADD_ONION` / `DEL_ONION`)

use super::auth::{AuthBasic, AuthConfig, AuthType, AuthenticatedClient, ClientEntry, ClientRegistry};
use super::keys::{KeyAlgorithm, KeyMaterial, KeyRequest};
use super::ports::{validate_ports, PortSpec};
use super::progress::{Progress, CREATED_PERCENT};
use super::upload::await_descriptor_upload;
use super::{CreateOptions, OnionServiceIdentity, ServiceState};
use crate::error::{OnionError, Result};
use crate::tor::{ControlConnection, HS_DESC_EVENT};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parsed `ADD_ONION` reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnionReply {
    pub service_id: String,
    pub private_key: Option<String>,
    /// `(name, token)` for every `ClientAuth=` line
    pub client_auth: Vec<(String, String)>,
}

impl AddOnionReply {
    pub fn parse(reply: &str) -> Result<Self> {
        let mut service_id = None;
        let mut private_key = None;
        let mut client_auth = Vec::new();

        for line in reply.lines().map(str::trim) {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "ServiceID" => service_id = Some(value.to_string()),
                "PrivateKey" => private_key = Some(value.to_string()),
                "ClientAuth" => match value.split_once(':') {
                    Some((name, token)) => client_auth.push((name.to_string(), token.to_string())),
                    None => {
                        return Err(OnionError::MalformedResponse(format!(
                            "ClientAuth line without a token: {}",
                            line
                        )))
                    },
                },
                _ => debug!("Ignoring ADD_ONION reply line: {}", key),
            }
        }

        let service_id = service_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                OnionError::MalformedResponse("ADD_ONION did not return a service id".to_string())
            })?;

        Ok(Self {
            service_id,
            private_key,
            client_auth,
        })
    }
}

/// Build an `ADD_ONION` command
pub fn build_add_onion(
    key_spec: &str,
    ports: &[PortSpec],
    options: &CreateOptions,
    clients: &[ClientEntry],
) -> String {
    let mut cmd = format!("ADD_ONION {}", key_spec);
    for port in ports {
        cmd.push_str(&format!(" Port={}", port.to_wire()));
    }

    let mut flags = Vec::new();
    if options.detach {
        flags.push("Detach");
    }
    if options.key.is_discard() {
        flags.push("DiscardPK");
    }
    if !clients.is_empty() {
        flags.push("BasicAuth");
    }
    if options.non_anonymous {
        flags.push("NonAnonymous");
    }
    if !flags.is_empty() {
        cmd.push_str(&format!(" Flags={}", flags.join(",")));
    }

    for client in clients {
        match &client.token {
            Some(token) => cmd.push_str(&format!(" ClientAuth={}:{}", client.name, token)),
            None => cmd.push_str(&format!(" ClientAuth={}", client.name)),
        }
    }
    cmd
}

/// Send `DEL_ONION`; anything but `OK` is a failure
pub async fn del_onion(control: &dyn ControlConnection, service_id: &str) -> Result<()> {
    let reply = control
        .send_command(&format!("DEL_ONION {}", service_id))
        .await?;
    if reply.trim() != "OK" {
        return Err(OnionError::RemovalFailed(reply));
    }
    info!(service_id = %service_id, "Removed onion service");
    Ok(())
}

/// State common to both ephemeral flavors once created
struct Created {
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    key: KeyMaterial,
    reply: AddOnionReply,
}

/// Validate, send `ADD_ONION`, then wait for descriptor upload
async fn add_onion<S: AsRef<str>>(
    control: &dyn ControlConnection,
    ports: &[S],
    clients: &[ClientEntry],
    options: &CreateOptions,
) -> Result<Created> {
    let ports = validate_ports(ports)?;
    options.check_ephemeral()?;
    let key_spec = options.key.key_spec(options.version)?;
    let cmd = build_add_onion(&key_spec, &ports, options, clients);

    let mut progress = Progress::new(options.progress.clone());
    let mut state = ServiceState::Requested;
    debug!(?state, "Creating ephemeral onion service");

    // Subscribe first so no upload event can be missed
    let subscription = if options.wait_for_upload {
        Some(control.subscribe(HS_DESC_EVENT).await?)
    } else {
        None
    };

    state = ServiceState::AwaitingResponse;
    debug!(?state, "Sending ADD_ONION");
    let reply = match control.send_command(&cmd).await.and_then(|r| AddOnionReply::parse(&r)) {
        Ok(reply) => reply,
        Err(e) => {
            if let Some(subscription) = subscription {
                if let Err(unsub) = control.unsubscribe(subscription).await {
                    warn!("Failed to unsubscribe from HS_DESC events: {}", unsub);
                }
            }
            return Err(e);
        },
    };

    let identity = OnionServiceIdentity::from_service_id(&reply.service_id);
    let key = match (&options.key, &reply.private_key) {
        (KeyRequest::Discard, _) => KeyMaterial::absent(discarded_algorithm(options.version)),
        (_, Some(returned)) => KeyMaterial::from_key_blob(returned),
        (KeyRequest::Blob(_), None) => KeyMaterial::from_key_blob(&key_spec),
        (KeyRequest::Generate, None) => KeyMaterial::absent(KeyAlgorithm::Unknown),
    };

    info!(onion_address = %identity.hostname(), "Created ephemeral onion service");
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
            // Do not leave a service behind that nobody holds a handle to
            if let Err(cleanup) = del_onion(control, identity.service_id()).await {
                warn!(service_id = %identity.service_id(), "Cleanup after failed upload failed: {}", cleanup);
            }
            return Err(e);
        }
    }

    Ok(Created {
        identity,
        ports,
        key,
        reply,
    })
}

fn discarded_algorithm(version: Option<u8>) -> KeyAlgorithm {
    match version {
        Some(3) => KeyAlgorithm::Ed25519V3,
        _ => KeyAlgorithm::Unknown,
    }
}

/// An `ADD_ONION` service without client authorization
pub struct EphemeralOnionService {
    control: Arc<dyn ControlConnection>,
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    key: KeyMaterial,
    version: Option<u8>,
    detach: bool,
    state: ServiceState,
}

impl EphemeralOnionService {
    /// Create the service and, unless opted out, wait for its descriptor
    pub async fn create<S: AsRef<str>>(
        control: Arc<dyn ControlConnection>,
        ports: &[S],
        options: CreateOptions,
    ) -> Result<Self> {
        let created = add_onion(control.as_ref(), ports, &[], &options).await?;
        Ok(Self {
            control,
            identity: created.identity,
            ports: created.ports,
            key: created.key,
            version: options.version,
            detach: options.detach,
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

    pub fn private_key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn is_detached(&self) -> bool {
        self.detach
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub async fn remove(&mut self) -> Result<()> {
        self.state.check_removable(self.identity.hostname())?;
        del_onion(self.control.as_ref(), self.identity.service_id()).await?;
        self.state = ServiceState::Removed;
        Ok(())
    }
}

impl fmt::Debug for EphemeralOnionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralOnionService")
            .field("hostname", &self.identity.hostname())
            .field("ports", &self.ports)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// An `ADD_ONION` service with basic client authorization
pub struct EphemeralAuthenticatedOnionService {
    control: Arc<dyn ControlConnection>,
    identity: OnionServiceIdentity,
    ports: Vec<PortSpec>,
    key: KeyMaterial,
    clients: ClientRegistry,
    version: Option<u8>,
    detach: bool,
    state: ServiceState,
}

impl EphemeralAuthenticatedOnionService {
    /// Create the service. Stealth authorization is not available through
    /// `ADD_ONION` and is rejected.
    pub async fn create<S: AsRef<str>>(
        control: Arc<dyn ControlConnection>,
        ports: &[S],
        auth: AuthConfig,
        options: CreateOptions,
    ) -> Result<Self> {
        let auth: AuthBasic = match auth {
            AuthConfig::Basic(basic) => basic,
            AuthConfig::Stealth(_) => {
                return Err(OnionError::UnsupportedAuthType(format!(
                    "{} authorization is not supported for ephemeral onion services",
                    AuthType::Stealth
                )))
            },
        };

        let created = add_onion(control.as_ref(), ports, auth.entries(), &options).await?;
        let clients = build_clients(&auth, &created, options.version)?;

        Ok(Self {
            control,
            identity: created.identity,
            ports: created.ports,
            key: created.key,
            clients,
            version: options.version,
            detach: options.detach,
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

    pub fn private_key(&self) -> &KeyMaterial {
        &self.key
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn is_detached(&self) -> bool {
        self.detach
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn client_names(&self) -> Vec<String> {
        self.clients.names().map(str::to_string).collect()
    }

    pub fn get_client(&self, name: &str) -> Result<&AuthenticatedClient> {
        self.clients
            .get(name)
            .ok_or_else(|| OnionError::ClientNotFound(name.to_string()))
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub async fn remove(&mut self) -> Result<()> {
        self.state.check_removable(self.identity.hostname())?;
        del_onion(self.control.as_ref(), self.identity.service_id()).await?;
        self.state = ServiceState::Removed;
        Ok(())
    }
}

impl fmt::Debug for EphemeralAuthenticatedOnionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralAuthenticatedOnionService")
            .field("hostname", &self.identity.hostname())
            .field("ports", &self.ports)
            .field("clients", &self.client_names())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Combine declared clients with the tokens Tor generated
fn build_clients(auth: &AuthBasic, created: &Created, version: Option<u8>) -> Result<ClientRegistry> {
    let ports: BTreeSet<String> = created.ports.iter().map(ToString::to_string).collect();
    let mut registry = ClientRegistry::new();

    for entry in auth.entries() {
        let generated = created
            .reply
            .client_auth
            .iter()
            .find(|(name, _)| *name == entry.name)
            .map(|(_, token)| token.clone());
        let auth_token = entry.token.clone().or(generated);
        if auth_token.is_none() {
            warn!(client = %entry.name, "ADD_ONION returned no token for client");
        }

        registry.insert(AuthenticatedClient {
            name: entry.name.clone(),
            auth_token,
            key: None,
            hostname: created.identity.hostname().to_string(),
            ports: ports.clone(),
            parent: created.identity.service_id().to_string(),
            version,
        })?;
    }

    for (name, _) in &created.reply.client_auth {
        if registry.get(name).is_none() {
            debug!(client = %name, "Ignoring token for undeclared client");
        }
    }
    Ok(registry)
}
