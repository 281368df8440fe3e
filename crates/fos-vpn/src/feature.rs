//! Feature identifiers
//!
//! Logical capabilities that need the shared tunnel. The set is closed:
//! upstream code decides which of these are wanted, the registry only
//! stores and compares them.

use serde::{Deserialize, Serialize};

/// A logical feature that requires the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    /// App tracking protection (local tracker-blocking tunnel)
    #[serde(rename = "apptp")]
    AppTrackingProtection,
    /// Network protection (remote VPN exit)
    #[serde(rename = "netp")]
    NetworkProtection,
}

impl Feature {
    /// Get all known features
    pub fn all() -> &'static [Feature] {
        &[Feature::AppTrackingProtection, Feature::NetworkProtection]
    }

    /// Stable key used for persistence
    pub fn key(&self) -> &'static str {
        match self {
            Feature::AppTrackingProtection => "apptp",
            Feature::NetworkProtection => "netp",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl std::str::FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.to_lowercase();
        Feature::all()
            .iter()
            .copied()
            .find(|f| f.key() == key)
            .ok_or(UnknownFeature(s.to_string()))
    }
}

/// Unrecognised feature key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown feature: {0}")]
pub struct UnknownFeature(pub String);
