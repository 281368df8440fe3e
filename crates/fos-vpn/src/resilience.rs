//! Connectivity Resilience
//!
//! Reacts to connectivity-loss signals with a bounded, escalating restart
//! policy (a circuit breaker):
//!
//! ```text
//! losses:    1  2  3  4  5  6  7  8  9  10 11 12
//! action:          R1       R2       R3       STOP
//! attempts:  0  0  1  1  1  2  2  2  3  3  3  0
//! ```
//!
//! Every `losses_per_attempt` losses escalate once. The first
//! `max_attempts` escalations force-restart the tunnel; the next one stops
//! it and clears the counter. Healthy signals (connected, started,
//! reconfigured, stopped by us) reset everything; transitional signals
//! (starting, start failed) change nothing.
//!
//! The escalation counter is persisted so a process relaunch does not
//! silently reset backoff. The loss tally is memory-only: losing it only
//! delays the next escalation.

use crate::feature::Feature;
use crate::lifecycle::{LifecycleEvent, LifecycleListener, SignalClass};
use crate::tunnel::TunnelController;
use fos_prefs::PreferenceStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Persisted escalation counter key
pub const RECONNECT_ATTEMPTS: &str = "RECONNECT_ATTEMPTS";

/// Store scope for a feature's resilience state
pub fn resilience_scope(feature: Feature) -> String {
    format!("vpn.resilience.{}", feature.key())
}

/// Whether a feature is currently enabled
pub trait FeatureStatus: Send + Sync {
    fn is_enabled(&self, feature: Feature) -> bool;
}

/// Remote kill switch for "restart on connectivity loss"
pub trait RemoteToggle: Send + Sync {
    fn is_enabled(&self) -> bool;
}

/// Decides whether a feature may drive the tunnel right now
pub trait OwnerArbitration: Send + Sync {
    fn may_own(&self, candidate: Feature) -> bool;
}

/// Arbitration between mutually exclusive tunnel owners.
///
/// A candidate may own the tunnel unless one of its declared competitors
/// is enabled.
pub struct CompetingFeatures {
    status: Arc<dyn FeatureStatus>,
    pairs: Vec<(Feature, Feature)>,
}

impl CompetingFeatures {
    pub fn new(status: Arc<dyn FeatureStatus>) -> Self {
        Self {
            status,
            pairs: Vec::new(),
        }
    }

    /// Declare `a` and `b` mutually exclusive owners
    pub fn compete(mut self, a: Feature, b: Feature) -> Self {
        self.pairs.push((a, b));
        self
    }

    /// Declared competitors of `candidate`
    pub fn competitors(&self, candidate: Feature) -> impl Iterator<Item = Feature> + '_ {
        self.pairs.iter().filter_map(move |&(a, b)| {
            if a == candidate {
                Some(b)
            } else if b == candidate {
                Some(a)
            } else {
                None
            }
        })
    }
}

impl OwnerArbitration for CompetingFeatures {
    fn may_own(&self, candidate: Feature) -> bool {
        let mut competitors = self.competitors(candidate);
        !competitors.any(|c| self.status.is_enabled(c))
    }
}

/// In-memory toggle, updated by whatever delivers remote config
#[derive(Debug)]
pub struct FlagToggle(AtomicBool);

impl FlagToggle {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

impl RemoteToggle for FlagToggle {
    fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Escalation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencePolicy {
    /// Losses per escalation step
    #[serde(default = "default_losses_per_attempt")]
    pub losses_per_attempt: u32,
    /// Restarts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_losses_per_attempt() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            losses_per_attempt: default_losses_per_attempt(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Persisted counter value; absent, negative or out-of-range reads as 0
fn stored_attempts(value: Option<i64>) -> u32 {
    value.and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    Restart(i64),
    GiveUp,
}

/// Restarts the tunnel on repeated connectivity loss, then gives up
pub struct ConnectivityResilienceMonitor {
    target: Feature,
    tunnel: Arc<dyn TunnelController>,
    store: Arc<dyn PreferenceStore>,
    features: Arc<dyn FeatureStatus>,
    arbitration: Arc<dyn OwnerArbitration>,
    toggle: Arc<dyn RemoteToggle>,
    policy: ResiliencePolicy,
    /// Losses since the last healthy signal
    losses: Mutex<u64>,
}

impl ConnectivityResilienceMonitor {
    /// Create a monitor for `target`. `store` is expected to be scoped to
    /// [`resilience_scope`] of the target.
    pub fn new(
        target: Feature,
        tunnel: Arc<dyn TunnelController>,
        store: Arc<dyn PreferenceStore>,
        features: Arc<dyn FeatureStatus>,
        arbitration: Arc<dyn OwnerArbitration>,
        toggle: Arc<dyn RemoteToggle>,
    ) -> Self {
        Self {
            target,
            tunnel,
            store,
            features,
            arbitration,
            toggle,
            policy: ResiliencePolicy::default(),
            losses: Mutex::new(0),
        }
    }

    pub fn with_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn target(&self) -> Feature {
        self.target
    }

    pub fn policy(&self) -> ResiliencePolicy {
        self.policy
    }

    /// Persisted escalation count (0 when absent or unreadable)
    pub fn attempts(&self) -> u32 {
        stored_attempts(self.store.get_int(RECONNECT_ATTEMPTS))
    }

    /// Handle one lifecycle signal
    pub fn on_event(&self, event: LifecycleEvent) {
        match event.class() {
            SignalClass::Loss => self.on_connectivity_loss(),
            SignalClass::Healthy => self.reset(event),
            SignalClass::Transitional | SignalClass::Ignored => {
                debug!("{}: {:?} leaves resilience state unchanged", self.target, event);
            }
        }
    }

    fn is_owner(&self) -> bool {
        if !self.features.is_enabled(self.target) {
            debug!("{}: not enabled, ignoring connectivity loss", self.target);
            return false;
        }
        if !self.arbitration.may_own(self.target) {
            debug!("{}: tunnel owned by a competing feature, ignoring connectivity loss", self.target);
            return false;
        }
        if !self.toggle.is_enabled() {
            debug!("{}: restart on loss disabled remotely, ignoring connectivity loss", self.target);
            return false;
        }
        true
    }

    fn on_connectivity_loss(&self) {
        if !self.is_owner() {
            return;
        }

        let mut losses = self.losses.lock().unwrap_or_else(PoisonError::into_inner);
        *losses += 1;

        let step = u64::from(self.policy.losses_per_attempt.max(1));
        if *losses % step != 0 {
            debug!("{}: connectivity loss {} below threshold", self.target, *losses);
            return;
        }

        let max_attempts = i64::from(self.policy.max_attempts);
        let mut escalation = Escalation::GiveUp;
        let stored = self.store.update_int(RECONNECT_ATTEMPTS, &mut |current| {
            let candidate = i64::from(stored_attempts(current)) + 1;
            if candidate > max_attempts {
                escalation = Escalation::GiveUp;
                0
            } else {
                escalation = Escalation::Restart(candidate);
                candidate
            }
        });
        if let Err(e) = stored {
            error!("{}: failed to persist reconnect attempts: {}", self.target, e);
        }

        match escalation {
            Escalation::Restart(attempt) => {
                warn!(
                    "{}: connectivity lost {} times, restarting tunnel (attempt {}/{})",
                    self.target, *losses, attempt, max_attempts
                );
                self.tunnel.restart(true);
            }
            Escalation::GiveUp => {
                error!(
                    "{}: connectivity not recovered after {} restarts, stopping tunnel",
                    self.target, max_attempts
                );
                self.tunnel.stop();
            }
        }
    }

    fn reset(&self, event: LifecycleEvent) {
        let mut losses = self.losses.lock().unwrap_or_else(PoisonError::into_inner);
        *losses = 0;

        if self.store.get_int(RECONNECT_ATTEMPTS).unwrap_or(0) != 0 {
            info!("{}: {:?}, clearing reconnect attempts", self.target, event);
            if let Err(e) = self.store.put_int(RECONNECT_ATTEMPTS, 0) {
                error!("{}: failed to clear reconnect attempts: {}", self.target, e);
            }
        }
    }
}

impl LifecycleListener for ConnectivityResilienceMonitor {
    fn on_event(&self, event: LifecycleEvent) {
        ConnectivityResilienceMonitor::on_event(self, event);
    }
}
