//! Feature Registry
//!
//! Turns "N independent features want the tunnel" into start/stop/restart
//! requests on the single shared tunnel.
//!
//! | Before | Call | After | Tunnel request |
//! |--------|------|-------|----------------|
//! | tunnel down | register | any | `start()` |
//! | tunnel up | register | any | `restart(false)` |
//! | any | unregister | empty | `stop()` |
//! | any | unregister | non-empty | `restart(false)` |
//! | registered | refresh | - | `restart(false)` |
//!
//! Membership is persisted as one boolean flag per feature so it survives
//! process restarts; the in-memory set is rebuilt from the store on first
//! use. Every mutation, including the `is_running()` read that picks the
//! tunnel request and the request itself, happens under one lock, so a
//! [`TunnelController`] must not re-enter the registry synchronously.

use crate::feature::Feature;
use crate::resilience::FeatureStatus;
use crate::tunnel::TunnelController;
use fos_prefs::PreferenceStore;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

/// Store scope holding registry membership flags
pub const REGISTRY_SCOPE: &str = "vpn.registry";

/// Tracks which features want the tunnel and drives it accordingly
pub struct FeatureRegistry {
    tunnel: Arc<dyn TunnelController>,
    store: Arc<dyn PreferenceStore>,
    /// Loaded lazily from `store`
    features: Mutex<Option<BTreeSet<Feature>>>,
}

impl FeatureRegistry {
    /// Create a registry persisting into `store` (expected to be scoped
    /// to [`REGISTRY_SCOPE`])
    pub fn new(tunnel: Arc<dyn TunnelController>, store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            tunnel,
            store,
            features: Mutex::new(None),
        }
    }

    /// Add `feature` and start or restart the tunnel
    pub fn register_feature(&self, feature: Feature) {
        self.with_features(|features| {
            let was_running = self.tunnel.is_running();

            features.insert(feature);
            self.persist(feature, true);

            if was_running {
                info!("Registered {}, restarting tunnel ({} features)", feature, features.len());
                self.tunnel.restart(false);
            } else {
                info!("Registered {}, starting tunnel", feature);
                self.tunnel.start();
            }
        });
    }

    /// Remove `feature` and stop or restart the tunnel
    pub fn unregister_feature(&self, feature: Feature) {
        self.with_features(|features| {
            features.remove(&feature);
            self.persist(feature, false);

            if features.is_empty() {
                info!("Unregistered {}, no features left, stopping tunnel", feature);
                self.tunnel.stop();
            } else {
                info!("Unregistered {}, restarting tunnel ({} features)", feature, features.len());
                self.tunnel.restart(false);
            }
        });
    }

    /// Re-apply configuration for a registered feature.
    ///
    /// Never starts or stops the tunnel.
    pub fn refresh_feature(&self, feature: Feature) {
        self.with_features(|features| {
            if features.contains(&feature) {
                info!("Refreshing {}, restarting tunnel", feature);
                self.tunnel.restart(false);
            } else {
                debug!("Refresh for unregistered {} ignored", feature);
            }
        });
    }

    /// Bring the tunnel back up after a process restart.
    ///
    /// Starts the tunnel when features were restored from the store but the
    /// tunnel is down. Returns whether a start was requested.
    pub fn restore_tunnel(&self) -> bool {
        self.with_features(|features| {
            if features.is_empty() || self.tunnel.is_running() {
                return false;
            }
            info!("Restoring tunnel for {} registered features", features.len());
            self.tunnel.start();
            true
        })
    }

    /// `feature` is registered and the tunnel is up
    pub fn is_feature_running(&self, feature: Feature) -> bool {
        self.with_features(|features| features.contains(&feature) && self.tunnel.is_running())
    }

    /// Some feature is registered and the tunnel is up
    pub fn is_any_feature_running(&self) -> bool {
        self.with_features(|features| !features.is_empty() && self.tunnel.is_running())
    }

    pub fn is_feature_registered(&self, feature: Feature) -> bool {
        self.with_features(|features| features.contains(&feature))
    }

    /// Registered features in stable order
    pub fn registered_features(&self) -> Vec<Feature> {
        self.with_features(|features| features.iter().copied().collect())
    }

    fn with_features<T>(&self, f: impl FnOnce(&mut BTreeSet<Feature>) -> T) -> T {
        let mut guard = self.features.lock().unwrap_or_else(PoisonError::into_inner);
        let features = guard.get_or_insert_with(|| self.load());
        f(features)
    }

    fn load(&self) -> BTreeSet<Feature> {
        let features: BTreeSet<Feature> = Feature::all()
            .iter()
            .copied()
            .filter(|f| self.store.get_bool(f.key()).unwrap_or(false))
            .collect();

        debug!("Restored {} registered features", features.len());
        features
    }

    fn persist(&self, feature: Feature, registered: bool) {
        if let Err(e) = self.store.put_bool(feature.key(), registered) {
            error!("Failed to persist registration of {}: {}", feature, e);
        }
    }
}

impl FeatureStatus for FeatureRegistry {
    fn is_enabled(&self, feature: Feature) -> bool {
        self.is_feature_registered(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, RecordingTunnel};
    use fos_prefs::{MemoryStore, ScopedStore};
    use crate::lifecycle::{lifecycle_channel, spawn_signal_pump, LifecycleEvent, LifecycleListener};
    use crate::tunnel::LocalTunnel;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    const APPTP: Feature = Feature::AppTrackingProtection;
    const NETP: Feature = Feature::NetworkProtection;

    fn setup() -> (FeatureRegistry, Arc<RecordingTunnel>, Arc<MemoryStore>) {
        let tunnel = Arc::new(RecordingTunnel::new());
        let store = Arc::new(MemoryStore::new());
        let registry = FeatureRegistry::new(tunnel.clone(), store.clone());
        (registry, tunnel, store)
    }

    #[test]
    fn test_first_registration_starts_tunnel() {
        let (registry, tunnel, _) = setup();

        registry.register_feature(APPTP);

        assert_eq!(tunnel.calls(), vec![Call::Start]);
        assert!(registry.is_feature_running(APPTP));
        assert!(!registry.is_feature_running(NETP));
        assert!(registry.is_any_feature_running());
    }

    #[test]
    fn test_second_registration_restarts_once() {
        let (registry, tunnel, _) = setup();
        registry.register_feature(APPTP);
        tunnel.clear();

        registry.register_feature(NETP);

        assert_eq!(tunnel.calls(), vec![Call::Restart { force: false }]);
        assert_eq!(registry.registered_features(), vec![APPTP, NETP]);
    }

    #[test]
    fn test_register_when_tunnel_stopped_externally_starts() {
        let (registry, tunnel, _) = setup();
        registry.register_feature(APPTP);
        tunnel.set_running(false);
        tunnel.clear();

        registry.register_feature(NETP);

        assert_eq!(tunnel.calls(), vec![Call::Start]);
    }

    #[test]
    fn test_register_is_idempotent() {
        let (registry, _, _) = setup();

        registry.register_feature(APPTP);
        registry.register_feature(APPTP);

        assert_eq!(registry.registered_features(), vec![APPTP]);
    }

    #[test]
    fn test_unregister_to_remainder_restarts_once() {
        let (registry, tunnel, _) = setup();
        registry.register_feature(APPTP);
        registry.register_feature(NETP);
        tunnel.clear();

        registry.unregister_feature(NETP);

        assert_eq!(tunnel.calls(), vec![Call::Restart { force: false }]);
        assert!(registry.is_feature_running(APPTP));
    }

    #[test]
    fn test_unregister_to_empty_stops_once() {
        let (registry, tunnel, _) = setup();
        registry.register_feature(APPTP);
        tunnel.clear();

        registry.unregister_feature(APPTP);

        assert_eq!(tunnel.calls(), vec![Call::Stop]);
        assert!(!registry.is_any_feature_running());
        assert!(!registry.is_feature_running(APPTP));
    }

    #[test]
    fn test_refresh_unregistered_is_noop() {
        let (registry, tunnel, _) = setup();

        registry.refresh_feature(NETP);
        assert!(tunnel.calls().is_empty());

        registry.register_feature(APPTP);
        tunnel.clear();
        registry.refresh_feature(NETP);
        assert!(tunnel.calls().is_empty());
    }

    #[test]
    fn test_refresh_registered_restarts() {
        let (registry, tunnel, _) = setup();
        registry.register_feature(APPTP);
        tunnel.clear();

        registry.refresh_feature(APPTP);

        assert_eq!(tunnel.calls(), vec![Call::Restart { force: false }]);
    }

    #[test]
    fn test_registrations_survive_restart() {
        let tunnel = Arc::new(RecordingTunnel::new());
        let backing: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
        let scoped = Arc::new(ScopedStore::new(backing.clone(), REGISTRY_SCOPE));

        {
            let registry = FeatureRegistry::new(tunnel.clone(), scoped.clone());
            registry.register_feature(NETP);
        }

        assert_eq!(backing.get_bool("vpn.registry.netp"), Some(true));

        let restored = FeatureRegistry::new(tunnel.clone(), scoped);
        assert_eq!(restored.registered_features(), vec![NETP]);
        assert!(restored.is_feature_running(NETP));

        tunnel.set_running(false);
        assert!(!restored.is_feature_running(NETP));
        assert!(restored.is_feature_registered(NETP));
    }

    #[test]
    fn test_restore_tunnel_after_relaunch() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = FeatureRegistry::new(Arc::new(RecordingTunnel::new()), store.clone());
            registry.register_feature(APPTP);
        }

        let tunnel = Arc::new(RecordingTunnel::new());
        let registry = FeatureRegistry::new(tunnel.clone(), store);

        assert!(registry.restore_tunnel());
        assert!(!registry.restore_tunnel());
        assert_eq!(tunnel.calls(), vec![Call::Start]);
    }

    #[test]
    fn test_restore_tunnel_with_nothing_registered() {
        let (registry, tunnel, _) = setup();

        assert!(!registry.restore_tunnel());
        assert!(tunnel.calls().is_empty());
    }

    #[test]
    fn test_registry_reports_feature_status() {
        let (registry, _, _) = setup();
        registry.register_feature(APPTP);

        let status: &dyn FeatureStatus = &registry;
        assert!(status.is_enabled(APPTP));
        assert!(!status.is_enabled(NETP));
    }

    #[test]
    fn test_concurrent_mutations_keep_tunnel_consistent() {
        let (registry, tunnel, _) = setup();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let feature = if i % 2 == 0 { APPTP } else { NETP };
                    for _ in 0..50 {
                        registry.register_feature(feature);
                        registry.unregister_feature(feature);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(registry.registered_features().is_empty());
        assert!(!tunnel.is_running());
    }

    /// Records what the registry reports each time a signal arrives
    struct StatusLog {
        registry: Arc<FeatureRegistry>,
        seen: Mutex<Vec<(LifecycleEvent, bool)>>,
    }

    impl LifecycleListener for StatusLog {
        fn on_event(&self, event: LifecycleEvent) {
            let running = self.registry.is_feature_running(APPTP);
            self.seen.lock().unwrap().push((event, running));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_signal_handlers_can_read_registry_during_requests() {
        let (events, receiver) = lifecycle_channel();
        let tunnel = LocalTunnel::with_events(events).shared();
        let registry = Arc::new(FeatureRegistry::new(tunnel, Arc::new(MemoryStore::new())));
        let log = Arc::new(StatusLog {
            registry: registry.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let pump = spawn_signal_pump(vec![log.clone() as Arc<dyn LifecycleListener>], receiver);

        registry.register_feature(APPTP);
        registry.refresh_feature(APPTP);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while log.seen.lock().unwrap().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        pump.abort();

        assert!(drained.is_ok());
        assert_eq!(
            *log.seen.lock().unwrap(),
            vec![
                (LifecycleEvent::Starting, true),
                (LifecycleEvent::Started, true),
                (LifecycleEvent::Connected, true),
                (LifecycleEvent::Reconfigured, true),
                (LifecycleEvent::Connected, true),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_running_matches_membership(ops in prop::collection::vec((any::<bool>(), any::<bool>()), 0..40)) {
            let (registry, _, _) = setup();

            for (register, apptp) in ops {
                let feature = if apptp { APPTP } else { NETP };
                if register {
                    registry.register_feature(feature);
                } else {
                    registry.unregister_feature(feature);
                }
                prop_assert_eq!(
                    registry.is_any_feature_running(),
                    !registry.registered_features().is_empty()
                );
            }
        }
    }
}
