//! Relay pairs between cascaded bridges.
//!
//! The two ends of a relay run complementary roles, all derived from a
//! single initiator flag whose value must differ at the two ends.

use crate::bridge::BridgeId;

use super::types::{DtlsSetup, Transport};

/// Lifecycle of one directed relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Create sent, transport response pending.
    Pending,
    /// Both directions wired up.
    Active,
    Failed,
}

/// One direction of a relay pair, owned by a bridge session and
/// pointing at a peer bridge.
#[derive(Debug, Clone)]
pub struct Relay {
    pub peer: BridgeId,
    /// Relay id of the peer, used to address the relay in requests.
    pub peer_relay_id: String,
    pub mesh_id: String,
    pub initiator: bool,
    pub state: RelayState,
}

impl Relay {
    pub fn new(peer: BridgeId, peer_relay_id: String, mesh_id: String, initiator: bool) -> Self {
        Self { peer, peer_relay_id, mesh_id, initiator, state: RelayState::Pending }
    }

    /// ICE controlling role.
    pub fn ice_controlling(&self) -> bool {
        self.initiator
    }

    /// DTLS setup this end advertises.
    pub fn dtls_setup(&self) -> DtlsSetup {
        if self.initiator {
            DtlsSetup::Active
        } else {
            DtlsSetup::Passive
        }
    }

    /// SCTP client role.
    pub fn sctp_client(&self) -> bool {
        self.initiator
    }

    /// Bridge-channel (websocket/SCTP) client role.
    pub fn bridge_channel_active(&self) -> bool {
        self.initiator
    }
}

/// Rewrite the remote side's `actpass` fingerprints to the concrete
/// setup this end must see. Bridges always hand out `actpass`; the
/// peer gets `active` when it initiates and `passive` otherwise.
pub fn rewrite_fingerprints(transport: &mut Transport, peer_is_initiator: bool) {
    let setup = if peer_is_initiator { DtlsSetup::Active } else { DtlsSetup::Passive };
    for fingerprint in &mut transport.fingerprints {
        if fingerprint.setup == DtlsSetup::Actpass {
            fingerprint.setup = setup;
        }
    }
}

/// Strip websocket bridge-channel children from a relay transport that
/// is about to be handed to a peer which must not act as channel
/// client.
pub fn strip_websockets_if_passive(
    transport: &mut Transport,
    sctp_datachannels: bool,
    bridge_channel_active: bool,
) {
    if !sctp_datachannels && !bridge_channel_active {
        transport.websockets.clear();
    }
}
