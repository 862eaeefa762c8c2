//! Typed colibri request/response messages.
//!
//! The focus speaks conference-modification directives to bridges
//! through [`ColibriTransport`]; encoding to the concrete wire format
//! is the transport adapter's concern.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::BridgeId;
use crate::source::{EndpointId, EndpointSourceSet};

/// Meeting id shared with the bridges to target a conference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeetingId(pub String);

impl MeetingId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// DTLS setup attribute of a fingerprint.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DtlsSetup {
    Actpass,
    Active,
    Passive,
}

/// DTLS fingerprint with its setup role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    pub setup: DtlsSetup,
    pub value: String,
}

/// SCTP association description on a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SctpDescription {
    pub port: Option<u16>,
    /// True when this side acts as the SCTP client.
    pub client: bool,
}

/// ICE/DTLS transport description exchanged with bridges and
/// participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub ufrag: Option<String>,
    pub pwd: Option<String>,
    /// Opaque candidate lines, accumulated across updates.
    pub candidates: Vec<String>,
    pub fingerprints: Vec<Fingerprint>,
    /// Websocket bridge-channel URLs.
    pub websockets: Vec<String>,
    pub sctp: Option<SctpDescription>,
}

impl Transport {
    /// Fold a transport update in: candidates accumulate, ufrag/pwd and
    /// fingerprints overwrite when present.
    pub fn merge(&mut self, update: &Transport) {
        if update.ufrag.is_some() {
            self.ufrag = update.ufrag.clone();
        }
        if update.pwd.is_some() {
            self.pwd = update.pwd.clone();
        }
        for candidate in &update.candidates {
            if !self.candidates.contains(candidate) {
                self.candidates.push(candidate.clone());
            }
        }
        if !update.fingerprints.is_empty() {
            self.fingerprints = update.fingerprints.clone();
        }
        if !update.websockets.is_empty() {
            self.websockets = update.websockets.clone();
        }
        if update.sctp.is_some() {
            self.sctp = update.sctp.clone();
        }
    }
}

/// What a directive does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveOp {
    Create,
    Modify,
    Expire,
}

/// Per-endpoint directive within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDirective {
    pub id: EndpointId,
    pub op: DirectiveOp,
    pub sources: Option<EndpointSourceSet>,
    pub transport: Option<Transport>,
    pub audio_force_muted: Option<bool>,
    pub video_force_muted: Option<bool>,
    /// Whether to allocate an SCTP association for this endpoint.
    pub sctp: bool,
}

impl EndpointDirective {
    pub fn create(id: EndpointId) -> Self {
        Self {
            id,
            op: DirectiveOp::Create,
            sources: None,
            transport: None,
            audio_force_muted: None,
            video_force_muted: None,
            sctp: false,
        }
    }

    pub fn modify(id: EndpointId) -> Self {
        Self { op: DirectiveOp::Modify, ..Self::create(id) }
    }

    pub fn expire(id: EndpointId) -> Self {
        Self { op: DirectiveOp::Expire, ..Self::create(id) }
    }
}

/// An endpoint re-advertised to a peer bridge over a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub id: EndpointId,
    pub sources: EndpointSourceSet,
}

/// Per-relay directive within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDirective {
    /// Relay id of the *peer* bridge this relay points at.
    pub id: String,
    pub op: DirectiveOp,
    pub mesh_id: Option<String>,
    /// Set on create; the two ends of a pair must differ.
    pub initiator: Option<bool>,
    pub transport: Option<Transport>,
    pub remote_endpoints: Vec<RemoteEndpoint>,
}

/// One request addressed to a bridge, targeting a conference by
/// meeting id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColibriRequest {
    pub bridge: BridgeId,
    pub meeting_id: MeetingId,
    /// Directs the bridge to create the conference; set on the first
    /// request of a session only.
    pub create: bool,
    pub endpoints: Vec<EndpointDirective>,
    pub relays: Vec<RelayDirective>,
    /// Templated transcriber connect URL, resolved per conference.
    pub transcriber_url: Option<String>,
    pub recording_url: Option<String>,
}

impl ColibriRequest {
    pub fn new(bridge: BridgeId, meeting_id: MeetingId) -> Self {
        Self {
            bridge,
            meeting_id,
            create: false,
            endpoints: Vec::new(),
            relays: Vec::new(),
            transcriber_url: None,
            recording_url: None,
        }
    }
}

/// Error reasons a bridge may return.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ColibriErrorReason {
    ConferenceNotFound,
    UnknownEndpoint,
    BadRequest,
    InternalError,
    ServiceUnavailable,
}

/// Per-endpoint payload of a success response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponse {
    pub id: EndpointId,
    pub transport: Option<Transport>,
    pub sctp_port: Option<u16>,
}

/// Per-relay payload of a success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub id: String,
    pub transport: Option<Transport>,
}

/// Typed bridge response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColibriResponse {
    ConferenceModified {
        /// Feedback sources the bridge advertises for mixed
        /// audio/video placeholders.
        feedback_sources: EndpointSourceSet,
        endpoints: Vec<EndpointResponse>,
        relays: Vec<RelayResponse>,
    },
    Error {
        reason: ColibriErrorReason,
        message: String,
    },
}

impl ColibriResponse {
    pub fn modified() -> Self {
        ColibriResponse::ConferenceModified {
            feedback_sources: EndpointSourceSet::new(),
            endpoints: Vec::new(),
            relays: Vec::new(),
        }
    }

    pub fn endpoint(&self, id: &EndpointId) -> Option<&EndpointResponse> {
        match self {
            ColibriResponse::ConferenceModified { endpoints, .. } => {
                endpoints.iter().find(|e| e.id == *id)
            }
            ColibriResponse::Error { .. } => None,
        }
    }
}

/// Transport-level failure of a bridge request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// No reply within the reply-timeout. Logged and dropped; not a
    /// bridge failure by itself.
    #[error("request timed out")]
    Timeout,

    #[error("connection to bridge failed: {0}")]
    Connection(String),
}

/// Request/response channel to the bridges. Implemented by the
/// signaling transport adapter; mocked in tests.
#[async_trait]
pub trait ColibriTransport: Send + Sync + 'static {
    async fn send(&self, request: ColibriRequest) -> Result<ColibriResponse, TransportError>;
}
