//! VPN Supervisor
//!
//! Wires the shared tunnel, the feature registry and the resilience
//! monitor together, and runs the task that feeds lifecycle signals to
//! the monitor.
//!
//! # Usage
//!
//! ```rust,ignore
//! let settings = VpnSettings::from_toml_file(path)?;
//! let store = VpnSupervisor::open_store(&settings)?;
//! let vpn = VpnSupervisor::spawn(&settings, store, |events| {
//!     LocalTunnel::with_events(events).shared() as Arc<dyn TunnelController>
//! });
//!
//! vpn.registry().register_feature(Feature::AppTrackingProtection);
//! println!("{}", vpn.status());
//! ```

use crate::config::{ConfigError, VpnSettings};
use crate::feature::{Feature, UnknownFeature};
use crate::lifecycle::{lifecycle_channel, spawn_signal_pump, LifecycleListener, LifecycleSender};
use crate::registry::{FeatureRegistry, REGISTRY_SCOPE};
use crate::resilience::{
    resilience_scope, CompetingFeatures, ConnectivityResilienceMonitor, FlagToggle,
};
use crate::routes::{self, RouteTable};
use crate::tunnel::TunnelController;
use fos_prefs::{FileStore, PreferenceStore, PrefsError, ScopedStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Feature whose connectivity the supervisor keeps alive
pub const RESILIENT_FEATURE: Feature = Feature::AppTrackingProtection;

/// VPN subsystem errors
#[derive(Debug, thiserror::Error)]
pub enum VpnError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Preferences error: {0}")]
    Prefs(#[from] PrefsError),

    #[error(transparent)]
    UnknownFeature(#[from] UnknownFeature),
}

/// Owns the tunnel subsystem
pub struct VpnSupervisor {
    tunnel: Arc<dyn TunnelController>,
    registry: Arc<FeatureRegistry>,
    monitor: Arc<ConnectivityResilienceMonitor>,
    toggle: Arc<FlagToggle>,
    events: LifecycleSender,
    pump: JoinHandle<()>,
}

impl VpnSupervisor {
    /// Open the durable store named by `settings`
    pub fn open_store(settings: &VpnSettings) -> Result<Arc<dyn PreferenceStore>, VpnError> {
        Ok(Arc::new(FileStore::open(&settings.store_path)?))
    }

    /// Build the subsystem and start the lifecycle pump.
    ///
    /// `make_tunnel` receives the sender the tunnel reports lifecycle
    /// signals on. Must be called inside a tokio runtime.
    pub fn spawn<F>(settings: &VpnSettings, store: Arc<dyn PreferenceStore>, make_tunnel: F) -> Self
    where
        F: FnOnce(LifecycleSender) -> Arc<dyn TunnelController>,
    {
        let (events, receiver) = lifecycle_channel();
        let tunnel = make_tunnel(events.clone());

        let registry = Arc::new(FeatureRegistry::new(
            tunnel.clone(),
            Arc::new(ScopedStore::new(store.clone(), REGISTRY_SCOPE)),
        ));

        let toggle = Arc::new(FlagToggle::new(settings.restart_on_loss));
        let arbitration = CompetingFeatures::new(registry.clone())
            .compete(Feature::AppTrackingProtection, Feature::NetworkProtection);

        let monitor = Arc::new(
            ConnectivityResilienceMonitor::new(
                RESILIENT_FEATURE,
                tunnel.clone(),
                Arc::new(ScopedStore::new(store, resilience_scope(RESILIENT_FEATURE))),
                registry.clone(),
                Arc::new(arbitration),
                toggle.clone(),
            )
            .with_policy(settings.resilience),
        );

        let listeners: Vec<Arc<dyn LifecycleListener>> = vec![monitor.clone() as Arc<dyn LifecycleListener>];
        let pump = spawn_signal_pump(listeners, receiver);

        info!(
            "VPN supervisor ready ({} registered features, {} routes)",
            registry.registered_features().len(),
            routes::routes().len()
        );

        Self {
            tunnel,
            registry,
            monitor,
            toggle,
            events,
            pump,
        }
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<ConnectivityResilienceMonitor> {
        &self.monitor
    }

    /// Toggle fed by remote config
    pub fn restart_on_loss(&self) -> &Arc<FlagToggle> {
        &self.toggle
    }

    /// Sender for lifecycle signals coming from the OS
    pub fn sender(&self) -> LifecycleSender {
        self.events.clone()
    }

    /// Routes to configure the tunnel with
    pub fn routes(&self) -> &'static RouteTable {
        routes::routes()
    }

    /// Register a feature by key
    pub fn register(&self, key: &str) -> Result<(), VpnError> {
        self.registry.register_feature(key.parse()?);
        Ok(())
    }

    /// Unregister a feature by key
    pub fn unregister(&self, key: &str) -> Result<(), VpnError> {
        self.registry.unregister_feature(key.parse()?);
        Ok(())
    }

    /// Format status for display
    pub fn status(&self) -> String {
        let features: Vec<String> = self
            .registry
            .registered_features()
            .iter()
            .map(|f| f.to_string())
            .collect();

        format!(
            "VPN: {} | Features: [{}] | Reconnect attempts: {}/{} | Routes: {}",
            if self.tunnel.is_running() { "running" } else { "stopped" },
            features.join(", "),
            self.monitor.attempts(),
            self.monitor.policy().max_attempts,
            self.routes().len()
        )
    }
}

impl Drop for VpnSupervisor {
    fn drop(&mut self) {
        // The tunnel holds a sender too, so the pump would outlive us
        self.pump.abort();
    }
}
