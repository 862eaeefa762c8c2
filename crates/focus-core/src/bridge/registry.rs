//! Registry of known bridges.
//!
//! Global read-mostly state shared by all conferences; guarded by a
//! single `RwLock` per the concurrency model.

use std::collections::HashMap;

use focus_common::EventEmitter;
use parking_lot::RwLock;

use super::bridge::{Bridge, BridgeId};

/// Registry-level bridge lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Added(BridgeId),
    Removed(BridgeId),
    /// The bridge was marked non-operational after a failure; sessions
    /// on it must be torn down.
    Failed(BridgeId),
}

/// Tracks every bridge the focus knows about.
#[derive(Debug, Default)]
pub struct BridgeRegistry {
    bridges: RwLock<HashMap<BridgeId, Bridge>>,
    emitter: EventEmitter<BridgeEvent>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: &str, listener: F)
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(name, listener);
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.emitter.unsubscribe(name)
    }

    /// Insert or refresh a bridge from its latest status report.
    pub fn upsert(&self, bridge: Bridge) {
        let id = bridge.id.clone();
        let is_new = {
            let mut bridges = self.bridges.write();
            bridges.insert(id.clone(), bridge).is_none()
        };
        if is_new {
            tracing::info!("Bridge added: {}", id);
            self.emitter.emit(&BridgeEvent::Added(id));
        }
    }

    pub fn remove(&self, id: &BridgeId) -> Option<Bridge> {
        let removed = self.bridges.write().remove(id);
        if removed.is_some() {
            tracing::info!("Bridge removed: {}", id);
            self.emitter.emit(&BridgeEvent::Removed(id.clone()));
        }
        removed
    }

    /// Mark a bridge non-operational after an error response or a
    /// transport failure.
    pub fn mark_failed(&self, id: &BridgeId) {
        let marked = {
            let mut bridges = self.bridges.write();
            match bridges.get_mut(id) {
                Some(bridge) if bridge.operational => {
                    bridge.operational = false;
                    true
                }
                _ => false,
            }
        };
        if marked {
            tracing::warn!("Bridge marked non-operational: {}", id);
            self.emitter.emit(&BridgeEvent::Failed(id.clone()));
        }
    }

    pub fn get(&self, id: &BridgeId) -> Option<Bridge> {
        self.bridges.read().get(id).cloned()
    }

    /// All bridges eligible for selection, in stable (stress, id)
    /// order.
    pub fn selectable(&self) -> Vec<Bridge> {
        let mut bridges: Vec<Bridge> =
            self.bridges.read().values().filter(|b| b.is_selectable()).cloned().collect();
        bridges.sort_by(|a, b| {
            a.stress.partial_cmp(&b.stress).unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        bridges
    }

    pub fn all(&self) -> Vec<Bridge> {
        self.bridges.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bridges.read().len()
    }

    pub fn operational_count(&self) -> usize {
        self.bridges.read().values().filter(|b| b.operational).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_upsert_emits_added_once() {
        let registry = BridgeRegistry::new();
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe("test", move |e| sink.lock().push(e.clone()));

        registry.upsert(Bridge::new(BridgeId::from("b1")));
        registry.upsert(Bridge::new(BridgeId::from("b1")).with_stress(0.5));

        assert_eq!(*events.lock(), vec![BridgeEvent::Added(BridgeId::from("b1"))]);
        assert_eq!(registry.get(&BridgeId::from("b1")).unwrap().stress, 0.5);
    }

    #[test]
    fn test_mark_failed_flips_operational_once() {
        let registry = BridgeRegistry::new();
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe("test", move |e| sink.lock().push(e.clone()));

        registry.upsert(Bridge::new(BridgeId::from("b1")));
        registry.mark_failed(&BridgeId::from("b1"));
        registry.mark_failed(&BridgeId::from("b1"));

        assert!(!registry.get(&BridgeId::from("b1")).unwrap().operational);
        let failed: Vec<_> = events
            .lock()
            .iter()
            .filter(|e| matches!(e, BridgeEvent::Failed(_)))
            .cloned()
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(registry.operational_count(), 0);
    }

    #[test]
    fn test_selectable_is_sorted_and_filtered() {
        let registry = BridgeRegistry::new();
        registry.upsert(Bridge::new(BridgeId::from("b2")).with_stress(0.3));
        registry.upsert(Bridge::new(BridgeId::from("b1")).with_stress(0.3));
        registry.upsert(Bridge::new(BridgeId::from("b3")).with_stress(0.1));
        let mut down = Bridge::new(BridgeId::from("b4"));
        down.operational = false;
        registry.upsert(down);

        let ids: Vec<_> = registry.selectable().iter().map(|b| b.id.clone()).collect();
        assert_eq!(
            ids,
            vec![BridgeId::from("b3"), BridgeId::from("b1"), BridgeId::from("b2")]
        );
    }
}
