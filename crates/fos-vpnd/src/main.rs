//! fos-vpnd: headless harness for the shared VPN tunnel
//!
//! Loads settings (`FOS_VPN_CONFIG`, TOML), restores persisted feature
//! registrations, registers any feature keys given on the command line,
//! and logs the route table and subsystem status. The tunnel is the
//! in-process `LocalTunnel`.

use anyhow::{Context, Result};
use fos_vpn::{LocalTunnel, TunnelController, VpnSettings, VpnSupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let settings = match std::env::var_os("FOS_VPN_CONFIG").map(PathBuf::from) {
        Some(path) => VpnSettings::from_toml_file(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => VpnSettings::default(),
    };
    info!("Preferences at {}", settings.store_path.display());

    let store = VpnSupervisor::open_store(&settings)?;
    let mut tunnel = None;
    let vpn = VpnSupervisor::spawn(&settings, store, |events| {
        let local = LocalTunnel::with_events(events).shared();
        tunnel = Some(local.clone());
        local as Arc<dyn TunnelController>
    });

    let routes = vpn.routes();
    info!("{} tunnel routes ({} addresses)", routes.len(), routes.address_count());
    for route in routes.routes() {
        let cidrs: Vec<String> = route.to_cidrs().iter().map(|c| c.to_string()).collect();
        debug!("{}: {}", route, cidrs.join(" "));
    }

    if vpn.registry().restore_tunnel() {
        info!("Restored {:?}", vpn.registry().registered_features());
    }

    for key in std::env::args().skip(1) {
        vpn.register(&key)
            .with_context(|| format!("registering {}", key))?;
    }

    // Let the lifecycle pump drain
    tokio::time::sleep(Duration::from_millis(50)).await;

    info!("{}", vpn.status());
    if let Some(tunnel) = tunnel {
        info!("Tunnel {}", tunnel.stats().format());
    }
    Ok(())
}
