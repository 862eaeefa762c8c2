//! Bridge selection.
//!
//! The default strategy keeps a conference inside one region where
//! possible and only cascades when a participant's region is served by
//! a different bridge. An external selection service can be plugged in;
//! it falls back to the built-in strategy on failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::FocusConfig;

use super::bridge::{Bridge, BridgeId};

/// Participant attributes that matter for placement.
#[derive(Debug, Clone, Default)]
pub struct ParticipantProperties {
    pub region: Option<String>,
    pub visitor: bool,
}

impl ParticipantProperties {
    pub fn in_region(region: impl Into<String>) -> Self {
        Self { region: Some(region.into()), visitor: false }
    }
}

/// Failure of the external selection service.
#[derive(Debug, thiserror::Error)]
pub enum ExternalSelectorError {
    #[error("selector transport failure: {0}")]
    Transport(String),

    #[error("selector response missing selected_bridge_index")]
    MissingIndex,
}

/// Adapter to an external (HTTP) bridge-selection service.
#[async_trait]
pub trait ExternalSelectorClient: Send + Sync {
    /// Return the index of the chosen bridge within `candidates`.
    async fn select_index(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[(BridgeId, usize)],
        participant: &ParticipantProperties,
    ) -> Result<usize, ExternalSelectorError>;
}

/// Counters for each decision branch, exposed via snapshot.
#[derive(Debug, Default)]
struct SelectorStats {
    initial_in_region: AtomicU64,
    initial_least_loaded: AtomicU64,
    in_region_in_conference: AtomicU64,
    in_region: AtomicU64,
    in_conference: AtomicU64,
    any_non_overloaded: AtomicU64,
    least_loaded_in_conference: AtomicU64,
    least_loaded: AtomicU64,
    cascade_denied: AtomicU64,
    none_available: AtomicU64,
    external_used: AtomicU64,
    external_fallback: AtomicU64,
}

/// Serializable snapshot of the selection counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelectorSnapshot {
    pub initial_in_region: u64,
    pub initial_least_loaded: u64,
    pub in_region_in_conference: u64,
    pub in_region: u64,
    pub in_conference: u64,
    pub any_non_overloaded: u64,
    pub least_loaded_in_conference: u64,
    pub least_loaded: u64,
    pub cascade_denied: u64,
    pub none_available: u64,
    pub external_used: u64,
    pub external_fallback: u64,
}

/// Picks a bridge for one allocation decision.
pub struct BridgeSelector {
    config: Arc<FocusConfig>,
    external: Option<Arc<dyn ExternalSelectorClient>>,
    stats: SelectorStats,
}

impl BridgeSelector {
    pub fn new(config: Arc<FocusConfig>) -> Self {
        Self { config, external: None, stats: SelectorStats::default() }
    }

    pub fn with_external(mut self, client: Arc<dyn ExternalSelectorClient>) -> Self {
        self.external = Some(client);
        self
    }

    /// Select a bridge for a new participant.
    ///
    /// `candidates` is the current selectable bridge list (least loaded
    /// first); `conference_bridges` lists bridges already in the
    /// conference in the order they were added, with their participant
    /// counts. Returns `None` when nothing is suitable.
    pub async fn select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[(BridgeId, usize)],
        participant: &ParticipantProperties,
    ) -> Option<Bridge> {
        if let Some(external) = &self.external {
            match external.select_index(candidates, conference_bridges, participant).await {
                Ok(index) if index < candidates.len() => {
                    self.stats.external_used.fetch_add(1, Ordering::Relaxed);
                    return Some(candidates[index].clone());
                }
                Ok(index) => {
                    tracing::warn!(
                        "External selector returned out-of-range index {}, falling back",
                        index
                    );
                    self.stats.external_fallback.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("External selector failed ({}), falling back", e);
                    self.stats.external_fallback.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.select_builtin(candidates, conference_bridges, participant)
    }

    /// The built-in intra-region strategy.
    fn select_builtin(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[(BridgeId, usize)],
        participant: &ParticipantProperties,
    ) -> Option<Bridge> {
        let selectable: Vec<Bridge> =
            candidates.iter().filter(|b| b.is_selectable()).cloned().collect();
        if selectable.is_empty() {
            self.stats.none_available.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let count_in_conference = |bridge: &Bridge| -> Option<usize> {
            conference_bridges.iter().find(|(id, _)| *id == bridge.id).map(|(_, n)| *n)
        };
        let overloaded = |bridge: &Bridge| -> bool {
            if bridge.is_overloaded(self.config.bridge.stress_threshold) {
                return true;
            }
            match (self.config.bridge.participant_cap(), count_in_conference(bridge)) {
                (Some(cap), Some(count)) => count >= cap,
                _ => false,
            }
        };

        if conference_bridges.is_empty() {
            let chosen = match selectable
                .iter()
                .find(|b| b.in_region(participant.region.as_deref()) && !overloaded(b))
            {
                Some(bridge) => {
                    self.stats.initial_in_region.fetch_add(1, Ordering::Relaxed);
                    bridge
                }
                None => {
                    self.stats.initial_least_loaded.fetch_add(1, Ordering::Relaxed);
                    &selectable[0]
                }
            };
            return Some(chosen.clone());
        }

        // The region to keep the conference in: the participant's own
        // region when it is served at all, else the region of the first
        // bridge already in the conference.
        let first_conference_bridge = conference_bridges
            .iter()
            .find_map(|(id, _)| candidates.iter().find(|b| b.id == *id));
        let target_region: Option<String> = participant
            .region
            .clone()
            .filter(|r| selectable.iter().any(|b| b.in_region(Some(r.as_str()))))
            .or_else(|| first_conference_bridge.and_then(|b| b.region.clone()));

        let in_conference = |bridge: &Bridge| count_in_conference(bridge).is_some();
        let in_target = |bridge: &Bridge| bridge.in_region(target_region.as_deref());

        let rungs: [(&dyn Fn(&Bridge) -> bool, &AtomicU64); 6] = [
            (
                &|b: &Bridge| !overloaded(b) && in_target(b) && in_conference(b),
                &self.stats.in_region_in_conference,
            ),
            (&|b: &Bridge| !overloaded(b) && in_target(b), &self.stats.in_region),
            (&|b: &Bridge| !overloaded(b) && in_conference(b), &self.stats.in_conference),
            (&|b: &Bridge| !overloaded(b), &self.stats.any_non_overloaded),
            (&|b: &Bridge| in_conference(b), &self.stats.least_loaded_in_conference),
            (&|_: &Bridge| true, &self.stats.least_loaded),
        ];

        let mut chosen: Option<&Bridge> = None;
        for (predicate, counter) in rungs {
            if let Some(bridge) = selectable.iter().find(|b| predicate(b)) {
                counter.fetch_add(1, Ordering::Relaxed);
                chosen = Some(bridge);
                break;
            }
        }
        // The last rung accepts anything, so a bridge was found.
        let chosen = chosen?;


        // Never cascade without relay support: a second bridge is only
        // allowed when both ends can relay.
        if !in_conference(chosen) {
            let relays_ok = chosen.relay_id.is_some()
                && conference_bridges.iter().all(|(id, _)| {
                    candidates
                        .iter()
                        .find(|b| b.id == *id)
                        .map(|b| b.relay_id.is_some())
                        .unwrap_or(false)
                });
            if !relays_ok {
                self.stats.cascade_denied.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Denying cascade to {} (missing relay support), keeping conference on \
                     its existing bridge",
                    chosen.id
                );
                return first_conference_bridge.cloned();
            }
        }

        Some(chosen.clone())
    }

    pub fn snapshot(&self) -> SelectorSnapshot {
        SelectorSnapshot {
            initial_in_region: self.stats.initial_in_region.load(Ordering::Relaxed),
            initial_least_loaded: self.stats.initial_least_loaded.load(Ordering::Relaxed),
            in_region_in_conference: self.stats.in_region_in_conference.load(Ordering::Relaxed),
            in_region: self.stats.in_region.load(Ordering::Relaxed),
            in_conference: self.stats.in_conference.load(Ordering::Relaxed),
            any_non_overloaded: self.stats.any_non_overloaded.load(Ordering::Relaxed),
            least_loaded_in_conference: self
                .stats
                .least_loaded_in_conference
                .load(Ordering::Relaxed),
            least_loaded: self.stats.least_loaded.load(Ordering::Relaxed),
            cascade_denied: self.stats.cascade_denied.load(Ordering::Relaxed),
            none_available: self.stats.none_available.load(Ordering::Relaxed),
            external_used: self.stats.external_used.load(Ordering::Relaxed),
            external_fallback: self.stats.external_fallback.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BridgeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSelector")
            .field("external", &self.external.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn selector() -> BridgeSelector {
        BridgeSelector::new(Arc::new(FocusConfig::default()))
    }

    fn relay_bridge(id: &str, region: &str) -> Bridge {
        Bridge::new(BridgeId::from(id)).with_region(region).with_relay_id(format!("r-{}", id))
    }

    fn fleet() -> Vec<Bridge> {
        vec![
            relay_bridge("b1", "eu"),
            relay_bridge("b2", "eu"),
            relay_bridge("b3", "us"),
        ]
    }

    #[tokio::test]
    async fn test_initial_selection_prefers_participant_region() {
        let selector = selector();
        let chosen = selector
            .select(&fleet(), &[], &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        assert_eq!(selector.snapshot().initial_in_region, 1);
    }

    #[tokio::test]
    async fn test_second_participant_same_region_reuses_bridge() {
        let selector = selector();
        let conference = [(BridgeId::from("b1"), 1)];
        let chosen = selector
            .select(&fleet(), &conference, &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        assert_eq!(selector.snapshot().in_region_in_conference, 1);
    }

    #[tokio::test]
    async fn test_remote_region_participant_triggers_cascade() {
        let selector = selector();
        let conference = [(BridgeId::from("b1"), 1)];
        let chosen = selector
            .select(&fleet(), &conference, &ParticipantProperties::in_region("us"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b3"));
        assert_eq!(selector.snapshot().in_region, 1);
    }

    #[tokio::test]
    async fn test_unknown_region_falls_back_to_least_loaded() {
        let selector = selector();
        let chosen = selector
            .select(&fleet(), &[], &ParticipantProperties::in_region("ap"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        assert_eq!(selector.snapshot().initial_least_loaded, 1);
    }

    #[tokio::test]
    async fn test_overloaded_bridge_avoided_when_alternative_exists() {
        let selector = selector();
        let candidates = vec![
            relay_bridge("b1", "eu").with_stress(0.9),
            relay_bridge("b2", "eu").with_stress(0.2),
        ];
        // Sorted by load: b2 first.
        let candidates: Vec<Bridge> = vec![candidates[1].clone(), candidates[0].clone()];
        let chosen = selector
            .select(&candidates, &[], &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b2"));
    }

    #[tokio::test]
    async fn test_all_overloaded_still_selects() {
        let selector = selector();
        let candidates = vec![
            relay_bridge("b1", "eu").with_stress(0.9),
            relay_bridge("b2", "eu").with_stress(0.95),
        ];
        let conference = [(BridgeId::from("b1"), 1)];
        let chosen = selector
            .select(&candidates, &conference, &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        assert_eq!(selector.snapshot().least_loaded_in_conference, 1);
    }

    #[tokio::test]
    async fn test_participant_cap_counts_as_overload() {
        let mut config = FocusConfig::default();
        config.bridge.max_participants_per_bridge = 2;
        let selector = BridgeSelector::new(Arc::new(config));

        let conference = [(BridgeId::from("b1"), 2)];
        let chosen = selector
            .select(&fleet(), &conference, &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        // b1 is at its cap; b2 is the in-region alternative.
        assert_eq!(chosen.id, BridgeId::from("b2"));
    }

    #[tokio::test]
    async fn test_cascade_denied_without_relay_ids() {
        let selector = selector();
        let candidates = vec![
            Bridge::new(BridgeId::from("b1")).with_region("eu"),
            Bridge::new(BridgeId::from("b3")).with_region("us"),
        ];
        let conference = [(BridgeId::from("b1"), 1)];
        let chosen = selector
            .select(&candidates, &conference, &ParticipantProperties::in_region("us"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        assert_eq!(selector.snapshot().cascade_denied, 1);
    }

    #[tokio::test]
    async fn test_no_selectable_bridges() {
        let selector = selector();
        let mut down = relay_bridge("b1", "eu");
        down.operational = false;
        assert!(selector
            .select(&[down], &[], &ParticipantProperties::default())
            .await
            .is_none());
        assert_eq!(selector.snapshot().none_available, 1);
    }

    struct FixedExternal(Result<usize, ()>);

    #[async_trait]
    impl ExternalSelectorClient for FixedExternal {
        async fn select_index(
            &self,
            _candidates: &[Bridge],
            _conference_bridges: &[(BridgeId, usize)],
            _participant: &ParticipantProperties,
        ) -> Result<usize, ExternalSelectorError> {
            self.0.map_err(|_| ExternalSelectorError::Transport("down".into()))
        }
    }

    #[tokio::test]
    async fn test_external_selector_used_when_healthy() {
        let selector = selector().with_external(Arc::new(FixedExternal(Ok(2))));
        let chosen = selector
            .select(&fleet(), &[], &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b3"));
        assert_eq!(selector.snapshot().external_used, 1);
    }

    #[tokio::test]
    async fn test_external_failure_falls_back_to_builtin() {
        let selector = selector().with_external(Arc::new(FixedExternal(Err(()))));
        let chosen = selector
            .select(&fleet(), &[], &ParticipantProperties::in_region("eu"))
            .await
            .unwrap();
        assert_eq!(chosen.id, BridgeId::from("b1"));
        let snapshot = selector.snapshot();
        assert_eq!(snapshot.external_fallback, 1);
        assert_eq!(snapshot.initial_in_region, 1);
    }
}
