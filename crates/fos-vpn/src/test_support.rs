//! Fakes shared by unit tests.

use crate::resilience::{FeatureStatus, RemoteToggle};
use crate::tunnel::TunnelController;
use crate::Feature;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A request made to the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
    Restart { force: bool },
}

/// Tunnel that records requests and follows them with its running flag
#[derive(Default)]
pub struct RecordingTunnel {
    running: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl RecordingTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn restarts(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Restart { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl TunnelController for RecordingTunnel {
    fn start(&self) {
        self.calls.lock().unwrap().push(Call::Start);
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(Call::Stop);
        self.running.store(false, Ordering::SeqCst);
    }

    fn restart(&self, force: bool) {
        self.calls.lock().unwrap().push(Call::Restart { force });
        self.running.store(true, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Feature flags flipped directly by tests
#[derive(Default)]
pub struct StaticFeatures(Mutex<HashSet<Feature>>);

impl StaticFeatures {
    pub fn with(features: &[Feature]) -> Self {
        Self(Mutex::new(features.iter().copied().collect()))
    }

    pub fn set(&self, feature: Feature, enabled: bool) {
        let mut set = self.0.lock().unwrap();
        if enabled {
            set.insert(feature);
        } else {
            set.remove(&feature);
        }
    }
}

impl FeatureStatus for StaticFeatures {
    fn is_enabled(&self, feature: Feature) -> bool {
        self.0.lock().unwrap().contains(&feature)
    }
}

/// Toggle with a fixed value
pub struct FixedToggle(pub bool);

impl RemoteToggle for FixedToggle {
    fn is_enabled(&self) -> bool {
        self.0
    }
}
