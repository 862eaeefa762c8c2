//! Shared test fixtures: a scriptable bridge transport and a recording
//! signaling sink.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use focus_core::bridge::{Bridge, BridgeId, BridgeRegistry};
use focus_core::colibri::{
    ColibriErrorReason, ColibriRequest, ColibriResponse, ColibriTransport, DirectiveOp,
    DtlsSetup, EndpointResponse, Fingerprint, RelayResponse, Transport, TransportError,
};
use focus_core::conference::{SignalingMessage, SignalingSender};
use focus_core::room::OccupantId;
use focus_core::source::EndpointSourceSet;

/// Bridge transport that answers like a healthy bridge and can be told
/// to fail per bridge.
#[derive(Default)]
pub struct MockBridgeTransport {
    pub requests: Mutex<Vec<ColibriRequest>>,
    failing: Mutex<HashSet<BridgeId>>,
    unreachable: Mutex<HashSet<BridgeId>>,
}

impl MockBridgeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a bridge answer every request with an error response.
    pub fn fail_bridge(&self, bridge: &BridgeId) {
        self.failing.lock().insert(bridge.clone());
    }

    /// Make a bridge time out / refuse connections.
    pub fn make_unreachable(&self, bridge: &BridgeId) {
        self.unreachable.lock().insert(bridge.clone());
    }

    pub fn requests_to(&self, bridge: &BridgeId) -> Vec<ColibriRequest> {
        self.requests.lock().iter().filter(|r| r.bridge == *bridge).cloned().collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn bridge_transport(bridge: &BridgeId) -> Transport {
        Transport {
            ufrag: Some(format!("{}-ufrag", bridge)),
            pwd: Some(format!("{}-pwd", bridge)),
            candidates: vec![format!("candidate:{}", bridge)],
            fingerprints: vec![Fingerprint {
                hash: "sha-256".into(),
                setup: DtlsSetup::Actpass,
                value: format!("FP:{}", bridge),
            }],
            websockets: vec![format!("wss://{}/colibri-ws", bridge)],
            sctp: None,
        }
    }
}

#[async_trait]
impl ColibriTransport for MockBridgeTransport {
    async fn send(&self, request: ColibriRequest) -> Result<ColibriResponse, TransportError> {
        self.requests.lock().push(request.clone());

        if self.unreachable.lock().contains(&request.bridge) {
            return Err(TransportError::Connection("connection refused".into()));
        }
        if self.failing.lock().contains(&request.bridge) {
            return Ok(ColibriResponse::Error {
                reason: ColibriErrorReason::InternalError,
                message: "scripted failure".into(),
            });
        }

        let endpoints = request
            .endpoints
            .iter()
            .filter(|d| d.op != DirectiveOp::Expire)
            .map(|d| EndpointResponse {
                id: d.id.clone(),
                transport: Some(Self::bridge_transport(&request.bridge)),
                sctp_port: if d.sctp { Some(5000) } else { None },
            })
            .collect();
        let relays = request
            .relays
            .iter()
            .filter(|r| r.op == DirectiveOp::Create)
            .map(|r| RelayResponse {
                id: r.id.clone(),
                transport: Some(Self::bridge_transport(&request.bridge)),
            })
            .collect();

        Ok(ColibriResponse::ConferenceModified {
            feedback_sources: EndpointSourceSet::new(),
            endpoints,
            relays,
        })
    }
}

/// Records every outbound signaling message.
#[derive(Default)]
pub struct MockSignaling {
    pub messages: Mutex<Vec<(OccupantId, SignalingMessage)>>,
    pub owners_granted: Mutex<Vec<OccupantId>>,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages_for(&self, occupant: &OccupantId) -> Vec<SignalingMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to == occupant)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Poll until `predicate` matches some recorded message or the
    /// timeout elapses.
    pub async fn wait_for<F>(&self, predicate: F) -> Option<(OccupantId, SignalingMessage)>
    where
        F: Fn(&OccupantId, &SignalingMessage) -> bool,
    {
        for _ in 0..200 {
            if let Some(found) =
                self.messages.lock().iter().find(|(to, m)| predicate(to, m)).cloned()
            {
                return Some(found);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl SignalingSender for MockSignaling {
    async fn send(&self, to: OccupantId, message: SignalingMessage) {
        self.messages.lock().push((to, message));
    }

    async fn grant_owner(&self, occupant: OccupantId) {
        self.owners_granted.lock().push(occupant);
    }
}

/// A registry with the standard three-bridge fleet used across tests.
pub fn fleet_registry() -> Arc<BridgeRegistry> {
    let registry = Arc::new(BridgeRegistry::new());
    registry.upsert(Bridge::new(BridgeId::from("b1")).with_region("eu").with_relay_id("r-b1"));
    registry.upsert(Bridge::new(BridgeId::from("b2")).with_region("eu").with_relay_id("r-b2"));
    registry.upsert(Bridge::new(BridgeId::from("b3")).with_region("us").with_relay_id("r-b3"));
    registry
}
