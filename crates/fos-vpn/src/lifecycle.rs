//! Tunnel lifecycle signals
//!
//! The OS tunnel reports what happened to it through a push-based stream
//! of [`LifecycleEvent`]s. A pump task fans each event out, in order, to
//! every registered [`LifecycleListener`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Why the tunnel went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Stopped on request from one of our own features
    SelfStop,
    /// Permission revoked or another VPN app took over
    Revoked,
    /// The OS tore the tunnel down after an error
    Error,
}

/// Something that happened to the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Tunnel is up but traffic stopped flowing
    ConnectivityLost,
    /// Traffic is flowing
    Connected,
    /// Start requested, not up yet
    Starting,
    /// Tunnel came up
    Started,
    /// Start request failed
    StartFailed,
    /// Tunnel restarted with a new configuration
    Reconfigured,
    /// Tunnel went down
    Stopped(StopReason),
}

/// How a resilience policy should treat an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Loss,
    Healthy,
    Transitional,
    /// Not ours to react to (OS-initiated stops)
    Ignored,
}

impl LifecycleEvent {
    pub fn class(&self) -> SignalClass {
        match self {
            LifecycleEvent::ConnectivityLost => SignalClass::Loss,
            LifecycleEvent::Connected
            | LifecycleEvent::Started
            | LifecycleEvent::Reconfigured
            | LifecycleEvent::Stopped(StopReason::SelfStop) => SignalClass::Healthy,
            LifecycleEvent::Starting | LifecycleEvent::StartFailed => SignalClass::Transitional,
            LifecycleEvent::Stopped(_) => SignalClass::Ignored,
        }
    }
}

/// Receives lifecycle events
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: LifecycleEvent);
}

/// Cloneable handle for publishing lifecycle events
#[derive(Debug, Clone)]
pub struct LifecycleSender {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl LifecycleSender {
    /// Publish an event. Dropped silently once the pump is gone.
    pub fn send(&self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            debug!("Lifecycle pump closed, dropping {:?}", event);
        }
    }
}

pub type LifecycleReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Create a lifecycle event channel
pub fn lifecycle_channel() -> (LifecycleSender, LifecycleReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LifecycleSender { tx }, rx)
}

/// Spawn the task delivering events to `listeners`.
///
/// Ends once every sender is dropped.
pub fn spawn_signal_pump(
    listeners: Vec<Arc<dyn LifecycleListener>>,
    mut events: LifecycleReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Lifecycle pump started ({} listeners)", listeners.len());

        while let Some(event) = events.recv().await {
            for listener in &listeners {
                listener.on_event(event);
            }
        }

        debug!("Lifecycle pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LifecycleEvent>>);

    impl LifecycleListener for Collect {
        fn on_event(&self, event: LifecycleEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_signal_classes() {
        assert_eq!(LifecycleEvent::ConnectivityLost.class(), SignalClass::Loss);
        assert_eq!(LifecycleEvent::Reconfigured.class(), SignalClass::Healthy);
        assert_eq!(
            LifecycleEvent::Stopped(StopReason::SelfStop).class(),
            SignalClass::Healthy
        );
        assert_eq!(
            LifecycleEvent::Stopped(StopReason::Revoked).class(),
            SignalClass::Ignored
        );
        assert_eq!(LifecycleEvent::StartFailed.class(), SignalClass::Transitional);
    }

    #[tokio::test]
    async fn test_pump_delivers_in_order_to_all() {
        let first = Arc::new(Collect::default());
        let second = Arc::new(Collect::default());
        let (sender, receiver) = lifecycle_channel();

        let listeners: Vec<Arc<dyn LifecycleListener>> = vec![
            first.clone() as Arc<dyn LifecycleListener>,
            second.clone() as Arc<dyn LifecycleListener>,
        ];
        let pump = spawn_signal_pump(listeners, receiver);

        sender.send(LifecycleEvent::Starting);
        sender.send(LifecycleEvent::Started);
        sender.send(LifecycleEvent::ConnectivityLost);
        drop(sender);
        pump.await.unwrap();

        let expected = vec![
            LifecycleEvent::Starting,
            LifecycleEvent::Started,
            LifecycleEvent::ConnectivityLost,
        ];
        assert_eq!(*first.0.lock().unwrap(), expected);
        assert_eq!(*second.0.lock().unwrap(), expected);
    }
}
