//! fOS VPN - Shared Tunnel Lifecycle
//!
//! Manages the single OS-level VPN tunnel that several browser features
//! (app tracking protection, network protection) share.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ register/unregister ┌─────────────────┐
//! │  UI / flags  │────────────────────▶│ FeatureRegistry │──┐
//! └──────────────┘                     └─────────────────┘  │ start/stop/
//!                                                           │ restart
//! ┌──────────────┐  lifecycle events   ┌─────────────────┐  ▼
//! │  OS tunnel   │────────────────────▶│   Resilience    │──▶ TunnelController
//! └──────────────┘                     │     Monitor     │
//!                                      └─────────────────┘
//!
//! RouteCalculator: 0.0.0.0/0 minus excluded ranges ─▶ tunnel setup
//! ```
//!
//! # Features
//!
//! - **Feature registry**: tunnel runs iff some feature wants it; durable
//! - **Route table**: pure, memoised complement of the excluded ranges
//! - **Circuit breaker**: bounded forced restarts on connectivity loss,
//!   then stop; counter persisted across relaunches

mod config;
mod feature;
mod lifecycle;
mod registry;
mod resilience;
mod routes;
mod supervisor;
mod tunnel;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, VpnSettings};
pub use feature::{Feature, UnknownFeature};
pub use lifecycle::{
    lifecycle_channel, spawn_signal_pump, LifecycleEvent, LifecycleListener, LifecycleReceiver,
    LifecycleSender, SignalClass, StopReason,
};
pub use registry::{FeatureRegistry, REGISTRY_SCOPE};
pub use resilience::{
    resilience_scope, CompetingFeatures, ConnectivityResilienceMonitor, FeatureStatus, FlagToggle,
    OwnerArbitration, RemoteToggle, ResiliencePolicy, RECONNECT_ATTEMPTS,
};
pub use routes::{
    next_address, routes, Cidr, ExcludedRange, ExclusionTable, Route, RouteCalculator, RouteError,
    RouteTable, MAX_ADDRESS,
};
pub use supervisor::{VpnError, VpnSupervisor, RESILIENT_FEATURE};
pub use tunnel::{LocalTunnel, TunnelController, TunnelStats};
