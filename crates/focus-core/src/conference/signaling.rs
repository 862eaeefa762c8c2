//! Outbound participant signaling.
//!
//! The conference emits typed messages; the transport adapter encodes
//! and delivers them.

use async_trait::async_trait;

use crate::colibri::Transport;
use crate::room::{OccupantId, StartMutedPolicy};
use crate::source::{EndpointId, EndpointSourceSet, MediaType};
use crate::room::Feature;

/// The session-initiate offer sent to a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceOffer {
    /// Bridge-side ICE/DTLS transport.
    pub transport: Transport,
    /// Mixed audio/video placeholder sources of the bridge.
    pub feedback_sources: EndpointSourceSet,
    /// Sources of the other endpoints, filtered for this recipient.
    pub conference_sources: Vec<(EndpointId, EndpointSourceSet)>,
    pub sctp_port: Option<u16>,
    pub bridge_region: Option<String>,
    pub start_muted: StartMutedPolicy,
}

/// Messages the conference sends to a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    SessionInitiate(ConferenceOffer),
    SourceAdd(Vec<(EndpointId, EndpointSourceSet)>),
    SourceRemove(Vec<(EndpointId, EndpointSourceSet)>),
    SessionTerminate { reason: String },
}

/// Outbound signaling sink implemented by the transport adapter.
#[async_trait]
pub trait SignalingSender: Send + Sync + 'static {
    async fn send(&self, to: OccupantId, message: SignalingMessage);

    /// Grant the owner affiliation to a room occupant. Default no-op
    /// for adapters without moderation rights.
    async fn grant_owner(&self, _occupant: OccupantId) {}
}

/// Filter an endpoint's advertised set for one recipient: optionally
/// strip simulcast and drop media the recipient cannot receive.
pub fn filter_sources_for(
    recipient_features: &std::collections::HashSet<Feature>,
    sources: &EndpointSourceSet,
    strip_simulcast: bool,
) -> EndpointSourceSet {
    let mut filtered =
        if strip_simulcast { sources.strip_simulcast() } else { sources.clone() };

    let audio_ok = recipient_features.contains(&Feature::Audio);
    let video_ok = recipient_features.contains(&Feature::Video);
    if audio_ok && video_ok {
        return filtered;
    }

    let dropped: Vec<crate::source::Ssrc> = filtered
        .sources
        .values()
        .filter(|s| match s.media_type {
            MediaType::Audio => !audio_ok,
            MediaType::Video => !video_ok,
        })
        .map(|s| s.ssrc)
        .collect();
    for ssrc in &dropped {
        filtered.sources.shift_remove(ssrc);
    }
    filtered.groups.retain(|g| !g.ssrcs.iter().any(|s| dropped.contains(s)));
    filtered
}
