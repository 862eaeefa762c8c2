//! Per-(conference, bridge) session state.

use std::collections::HashMap;

use serde::Serialize;

use crate::bridge::{Bridge, BridgeId};
use crate::source::{EndpointId, EndpointSourceSet};

use super::relay::{Relay, RelayState};
use super::types::RemoteEndpoint;

/// Control-session state for one bridge within one conference.
///
/// The `created` flag gates whether the next request carries the
/// create-conference directive.
#[derive(Debug)]
pub struct BridgeSession {
    pub bridge: Bridge,
    /// Session id, unique per (conference, bridge) incarnation.
    pub id: String,
    pub created: bool,
    /// Participants allocated here, with their advertised sources (the
    /// set re-advertised to relay peers).
    pub participants: HashMap<EndpointId, EndpointSourceSet>,
    /// Feedback sources the bridge advertises for mixed audio/video
    /// placeholders.
    pub feedback_sources: EndpointSourceSet,
    /// Relays to peer bridges, keyed by peer.
    pub relays: HashMap<BridgeId, Relay>,
    pub failed: bool,
}

impl BridgeSession {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            id: uuid::Uuid::new_v4().to_string(),
            created: false,
            participants: HashMap::new(),
            feedback_sources: EndpointSourceSet::new(),
            relays: HashMap::new(),
            failed: false,
        }
    }

    /// The full endpoint set a relay peer should see for this bridge.
    pub fn remote_endpoints(&self) -> Vec<RemoteEndpoint> {
        let mut endpoints: Vec<RemoteEndpoint> = self
            .participants
            .iter()
            .map(|(id, sources)| RemoteEndpoint { id: id.clone(), sources: sources.clone() })
            .collect();
        endpoints.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        endpoints
    }

    pub fn bridge_id(&self) -> &BridgeId {
        &self.bridge.id
    }

    /// Own relay id, when the bridge supports cascading.
    pub fn relay_id(&self) -> Option<&str> {
        self.bridge.relay_id.as_deref()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn snapshot(&self) -> BridgeSessionSnapshot {
        BridgeSessionSnapshot {
            bridge: self.bridge.id.as_str().to_string(),
            session_id: self.id.clone(),
            region: self.bridge.region.clone(),
            created: self.created,
            failed: self.failed,
            participants: {
                let mut ids: Vec<String> =
                    self.participants.keys().map(|e| e.as_str().to_string()).collect();
                ids.sort();
                ids
            },
            relays: {
                let mut peers: Vec<RelaySnapshot> = self
                    .relays
                    .values()
                    .map(|r| RelaySnapshot {
                        peer: r.peer.as_str().to_string(),
                        mesh_id: r.mesh_id.clone(),
                        initiator: r.initiator,
                        active: r.state == RelayState::Active,
                    })
                    .collect();
                peers.sort_by(|a, b| a.peer.cmp(&b.peer));
                peers
            },
        }
    }
}

/// Serializable introspection view of a session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BridgeSessionSnapshot {
    pub bridge: String,
    pub session_id: String,
    pub region: Option<String>,
    pub created: bool,
    pub failed: bool,
    pub participants: Vec<String>,
    pub relays: Vec<RelaySnapshot>,
}

/// Serializable view of one relay.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub peer: String,
    pub mesh_id: String,
    pub initiator: bool,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_needs_create() {
        let session = BridgeSession::new(Bridge::new(BridgeId::from("b1")).with_region("eu"));
        assert!(!session.created);
        assert!(session.participants.is_empty());
        assert!(!session.id.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let mut session = BridgeSession::new(Bridge::new(BridgeId::from("b1")));
        session.participants.insert(EndpointId::from("zz"), EndpointSourceSet::new());
        session.participants.insert(EndpointId::from("aa"), EndpointSourceSet::new());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.participants, vec!["aa".to_string(), "zz".to_string()]);
        assert_eq!(session.remote_endpoints().len(), 2);
    }
}
