//! Up command - create the configured onion services
//!
//! Services stay up until Ctrl-C, then every non-detached service is removed
//! again (unless `--keep` is given).

use super::UpArgs;
use crate::config::{self, ServiceConfig};
use crate::onion::{create_onion_service, OnionService, ProgressObserver};
use crate::tor::control::TorController;
use crate::tor::{ControlConfStore, ControlConnection, HiddenServiceStore};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run the up command
pub async fn run_up(config_path: Option<&Path>, args: &UpArgs) -> Result<()> {
    let config = config::load_config(config_path)?;
    if config.services.is_empty() {
        bail!("No services configured");
    }

    let controller = TorController::connect(&config.tor)
        .await
        .context("Failed to connect to Tor control port")?;
    info!(tor_version = %controller.version(), "Connected to Tor");
    let control: Arc<dyn ControlConnection> = Arc::new(controller);
    let mut store = ControlConfStore::load(Arc::clone(&control))
        .await
        .context("Failed to read existing hidden service configuration")?;

    let mut services = Vec::new();
    for (idx, service) in config.services.iter().enumerate() {
        match create(&control, &mut store, service, args.timeout_secs).await {
            Ok(created) => {
                print_service(&created);
                services.push(created);
            },
            Err(e) => {
                teardown(&mut services, &mut store).await;
                return Err(e.context(format!("Failed to create services[{}]", idx)));
            },
        }
    }

    println!("\n🧅 {} onion service(s) up. Press Ctrl-C to stop.", services.len());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    if args.keep {
        info!("Leaving services in place");
        return Ok(());
    }
    teardown(&mut services, &mut store).await;
    Ok(())
}

async fn create(
    control: &Arc<dyn ControlConnection>,
    store: &mut ControlConfStore,
    service: &ServiceConfig,
    timeout_secs: Option<u64>,
) -> Result<OnionService> {
    let request = service.to_request()?;
    let ports = request.port_strings();
    let mut options = request.options;
    options.progress = Some(ProgressObserver::new(|percent, tag, message| {
        info!(percent, tag = %tag, "{}", message);
        Ok(())
    }));

    let kind = request.kind;
    let auth = request.auth;
    let Some(secs) = timeout_secs else {
        return Ok(create_onion_service(Arc::clone(control), store, kind, &ports, auth, options).await?);
    };

    let configured = store.hidden_services().clone();
    let creation = create_onion_service(Arc::clone(control), &mut *store, kind, &ports, auth, options);
    match tokio::time::timeout(Duration::from_secs(secs), creation).await {
        Ok(created) => Ok(created?),
        Err(_) => {
            // An abandoned filesystem creation may already be applied in Tor
            if *store.hidden_services() != configured {
                *store.hidden_services() = configured;
                if let Err(e) = store.save().await {
                    warn!("Failed to roll back hidden service configuration: {}", e);
                }
            }
            bail!("Timed out after {}s waiting for descriptor upload", secs)
        },
    }
}

fn print_service(service: &OnionService) {
    println!("✅ {} ({})", service.hostname(), service.kind());
    for port in service.ports() {
        println!("   port {}", port);
    }

    match service {
        OnionService::EphemeralAuthenticated(s) => {
            for client in s.clients().iter() {
                println!(
                    "   client {}: {}",
                    client.name,
                    client.auth_token.as_deref().unwrap_or("<no token>")
                );
            }
        },
        OnionService::FilesystemAuthenticated(s) => match s.clients() {
            Ok(clients) => {
                for client in clients.iter() {
                    println!(
                        "   client {}: {} {}",
                        client.name,
                        client.hostname,
                        client.auth_token.as_deref().unwrap_or("<no token>")
                    );
                }
            },
            Err(e) => warn!("Could not read clients of {}: {}", service.hostname(), e),
        },
        _ => {},
    }
}

async fn teardown(services: &mut Vec<OnionService>, store: &mut dyn HiddenServiceStore) {
    for mut service in services.drain(..).rev() {
        if service.is_detached() {
            info!(onion_address = %service.hostname(), "Leaving detached service in place");
            continue;
        }
        match service.remove(store).await {
            Ok(()) => println!("🗑️  Removed {}", service.hostname()),
            Err(e) => warn!(onion_address = %service.hostname(), "Removal failed: {}", e),
        }
    }
}
