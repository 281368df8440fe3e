//! Tunnel Controller
//!
//! The tunnel is one exclusive OS resource shared by every feature. The
//! core only ever asks for it to be started, stopped or restarted; those
//! requests are fire-and-forget and their outcome comes back later as
//! lifecycle signals.

use crate::lifecycle::{LifecycleEvent, LifecycleSender, StopReason};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Control surface of the OS tunnel.
///
/// Implementations must report outcomes asynchronously, by queueing
/// lifecycle signals (see [`LifecycleSender`]) rather than invoking
/// listeners from inside `start`, `stop` or `restart`. The registry calls
/// these methods while holding its lock, and the resilience monitor reads
/// the registry when it handles a signal.
pub trait TunnelController: Send + Sync {
    /// Bring the tunnel up
    fn start(&self);

    /// Tear the tunnel down
    fn stop(&self);

    /// Re-establish the tunnel with a freshly built configuration.
    ///
    /// `force` restarts even when the configuration did not change.
    fn restart(&self, force: bool);

    /// Whether the tunnel is currently up
    fn is_running(&self) -> bool;
}

/// Tunnel request counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelStats {
    pub starts: u64,
    pub stops: u64,
    pub restarts: u64,
    pub forced_restarts: u64,
}

impl TunnelStats {
    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "starts: {}, stops: {}, restarts: {} ({} forced)",
            self.starts, self.stops, self.restarts, self.forced_restarts
        )
    }
}

/// In-process tunnel stand-in.
///
/// Tracks the running flag and request counts, and reports the outcome of
/// each request as lifecycle signals when a sender is attached. Used by the
/// headless daemon and by integration tests; a platform build swaps in its
/// own [`TunnelController`].
pub struct LocalTunnel {
    running: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    restarts: AtomicU64,
    forced_restarts: AtomicU64,
    events: Option<LifecycleSender>,
}

impl LocalTunnel {
    /// Create a tunnel that reports nothing
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            starts: AtomicU64::new(0),
            stops: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            forced_restarts: AtomicU64::new(0),
            events: None,
        }
    }

    /// Create a tunnel that reports lifecycle signals to `events`
    pub fn with_events(events: LifecycleSender) -> Self {
        Self {
            events: Some(events),
            ..Self::new()
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get request counters
    pub fn stats(&self) -> TunnelStats {
        TunnelStats {
            starts: self.starts.load(Ordering::Relaxed),
            stops: self.stops.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            forced_restarts: self.forced_restarts.load(Ordering::Relaxed),
        }
    }

    /// Simulate the OS dropping connectivity
    pub fn lose_connectivity(&self) {
        debug!("Local tunnel: connectivity lost");
        self.emit(LifecycleEvent::ConnectivityLost);
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(ref events) = self.events {
            events.send(event);
        }
    }
}

impl Default for LocalTunnel {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelController for LocalTunnel {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Local tunnel already running");
            return;
        }

        info!("Starting tunnel");
        self.emit(LifecycleEvent::Starting);
        self.emit(LifecycleEvent::Started);
        self.emit(LifecycleEvent::Connected);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::Relaxed);
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Local tunnel already stopped");
            return;
        }

        info!("Stopping tunnel");
        self.emit(LifecycleEvent::Stopped(StopReason::SelfStop));
    }

    fn restart(&self, force: bool) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
        if force {
            self.forced_restarts.fetch_add(1, Ordering::Relaxed);
        }

        info!("Restarting tunnel (force: {})", force);
        self.running.store(true, Ordering::SeqCst);
        self.emit(LifecycleEvent::Reconfigured);
        self.emit(LifecycleEvent::Connected);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
