//! Per-bridge state.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identity of a media bridge (its control address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BridgeId(pub String);

impl BridgeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BridgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Everything the focus tracks about one bridge.
#[derive(Debug, Clone)]
pub struct Bridge {
    pub id: BridgeId,
    pub region: Option<String>,
    /// Identifier used when this bridge participates in a cascade;
    /// absent when the bridge cannot relay.
    pub relay_id: Option<String>,
    /// Last reported stress level, 0.0 .. 1.0 and beyond under
    /// overload.
    pub stress: f64,
    pub operational: bool,
    pub graceful_shutdown: bool,
    pub draining: bool,
    pub version: Option<String>,
    pub supports_colibri2: bool,
    pub last_updated: Instant,
}

impl Bridge {
    pub fn new(id: BridgeId) -> Self {
        Self {
            id,
            region: None,
            relay_id: None,
            stress: 0.0,
            operational: true,
            graceful_shutdown: false,
            draining: false,
            version: None,
            supports_colibri2: true,
            last_updated: Instant::now(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_relay_id(mut self, relay_id: impl Into<String>) -> Self {
        self.relay_id = Some(relay_id.into());
        self
    }

    pub fn with_stress(mut self, stress: f64) -> Self {
        self.stress = stress;
        self
    }

    /// Whether new conferences/participants may be placed here at all.
    pub fn is_selectable(&self) -> bool {
        self.operational && !self.graceful_shutdown && !self.draining
    }

    pub fn is_overloaded(&self, stress_threshold: f64) -> bool {
        self.stress >= stress_threshold
    }

    pub fn in_region(&self, region: Option<&str>) -> bool {
        match (self.region.as_deref(), region) {
            (Some(own), Some(wanted)) => own == wanted,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectability() {
        let mut bridge = Bridge::new(BridgeId::from("b1"));
        assert!(bridge.is_selectable());

        bridge.draining = true;
        assert!(!bridge.is_selectable());

        bridge.draining = false;
        bridge.graceful_shutdown = true;
        assert!(!bridge.is_selectable());

        bridge.graceful_shutdown = false;
        bridge.operational = false;
        assert!(!bridge.is_selectable());
    }

    #[test]
    fn test_overload_threshold() {
        let bridge = Bridge::new(BridgeId::from("b1")).with_stress(0.8);
        assert!(bridge.is_overloaded(0.8));
        assert!(!bridge.is_overloaded(0.9));
    }
}
