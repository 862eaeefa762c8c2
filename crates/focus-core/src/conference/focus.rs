//! Top-level conference store.
//!
//! Owns every live conference keyed by room id; conferences are created
//! on first join and dropped when they end.

use std::sync::Arc;

use dashmap::DashMap;

use crate::bridge::{BridgeRegistry, BridgeSelector};
use crate::colibri::{ColibriTransport, MeetingId};
use crate::config::FocusConfig;
use crate::room::{PresenceSender, RoomId};

use super::conference::FocusConference;
use super::signaling::SignalingSender;

/// Creates and tracks [`FocusConference`]s.
pub struct FocusManager {
    config: Arc<FocusConfig>,
    registry: Arc<BridgeRegistry>,
    selector: Arc<BridgeSelector>,
    transport: Arc<dyn ColibriTransport>,
    signaling: Arc<dyn SignalingSender>,
    presence_sender: Arc<dyn PresenceSender>,
    conferences: DashMap<RoomId, Arc<FocusConference>>,
}

impl FocusManager {
    pub fn new(
        config: Arc<FocusConfig>,
        registry: Arc<BridgeRegistry>,
        transport: Arc<dyn ColibriTransport>,
        signaling: Arc<dyn SignalingSender>,
        presence_sender: Arc<dyn PresenceSender>,
    ) -> Self {
        let selector = Arc::new(BridgeSelector::new(config.clone()));
        Self {
            config,
            registry,
            selector,
            transport,
            signaling,
            presence_sender,
            conferences: DashMap::new(),
        }
    }

    /// The shared selector, for introspection of its counters.
    pub fn selector(&self) -> &Arc<BridgeSelector> {
        &self.selector
    }

    /// Get the conference for a room, creating it on first use.
    pub fn conference_for(
        &self,
        room_id: &RoomId,
        meeting_id: Option<MeetingId>,
    ) -> Arc<FocusConference> {
        self.conferences
            .entry(room_id.clone())
            .or_insert_with(|| {
                tracing::info!("Creating conference for {}", room_id);
                FocusConference::new(
                    room_id.clone(),
                    self.config.clone(),
                    self.registry.clone(),
                    self.selector.clone(),
                    self.transport.clone(),
                    self.signaling.clone(),
                    self.presence_sender.clone(),
                    meeting_id,
                )
            })
            .clone()
    }

    pub fn get(&self, room_id: &RoomId) -> Option<Arc<FocusConference>> {
        self.conferences.get(room_id).map(|entry| entry.clone())
    }

    /// Destroy and drop one conference.
    pub fn remove(&self, room_id: &RoomId, reason: &str) -> bool {
        match self.conferences.remove(room_id) {
            Some((_, conference)) => {
                conference.destroy(reason);
                true
            }
            None => false,
        }
    }

    pub fn conference_count(&self) -> usize {
        self.conferences.len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.conferences.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl std::fmt::Debug for FocusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusManager")
            .field("conferences", &self.conferences.len())
            .finish()
    }
}
