//! Conference-level events.

use crate::bridge::BridgeId;
use crate::room::RoomId;
use crate::source::EndpointId;

/// Events the conference surfaces to its embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceEvent {
    ParticipantInvited(EndpointId),
    ParticipantEstablished(EndpointId),
    ParticipantTerminated(EndpointId),
    /// A bridge session failed and the listed endpoints are being
    /// re-invited.
    BridgeSessionFailed { bridge: BridgeId, endpoints: Vec<EndpointId> },
    ConferenceEnded { room: RoomId, reason: String },
}
