//! Typed presence packets and chat addressing.
//!
//! The XMPP transport hands the room a stream of already-decoded
//! presence packets; serialization stays outside the core. Occupant
//! addresses follow the `room@service/nickname` shape and the nickname
//! doubles as the endpoint id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::EndpointId;

/// Bare chat-room address (`room@conference.example.com`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Full occupant address (`room@service/nickname`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupantId(pub String);

impl OccupantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The room part of the address.
    pub fn room(&self) -> RoomId {
        match self.0.split_once('/') {
            Some((room, _)) => RoomId::new(room),
            None => RoomId::new(self.0.clone()),
        }
    }

    /// The nickname (resource) part, which is the room-scoped endpoint
    /// id.
    pub fn resource(&self) -> &str {
        self.0.split_once('/').map(|(_, r)| r).unwrap_or("")
    }

    pub fn endpoint_id(&self) -> EndpointId {
        EndpointId::new(self.resource())
    }

    /// Validate the resource as an endpoint id. In strict mode only the
    /// canonical 8-char lowercase-hex form is accepted; lenient mode
    /// takes any non-empty resource.
    pub fn validate_endpoint_id(&self, strict: bool) -> bool {
        let resource = self.resource();
        if resource.is_empty() {
            return false;
        }
        if !strict {
            return true;
        }
        resource.len() == 8
            && resource.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }
}

impl fmt::Display for OccupantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OccupantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Presence availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceType {
    Available,
    Unavailable,
}

/// The room-service occupant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MucRole {
    Moderator,
    Participant,
    Visitor,
    None,
}

/// The room-service occupant affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MucAffiliation {
    Owner,
    Admin,
    Member,
    None,
    Outcast,
}

/// Room-service status code signalling a kick.
pub const STATUS_KICKED: u32 = 307;

/// Typed presence extension payloads the focus consumes or emits.
///
/// `Opaque` carries extensions the conference attaches to its own
/// presence without the core interpreting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceExtension {
    /// `UserInfo` service-robot marker.
    UserInfo { robot: bool },
    /// XEP-0115 entity capabilities.
    Caps { node: String, ver: String },
    /// Raw source-info JSON payload.
    SourceInfo(String),
    /// Feature strings advertised by the member.
    Features(Vec<String>),
    /// Participant region tag.
    Region(String),
    /// Statistics id.
    StatsId(String),
    /// Ordered preferred video codec list.
    CodecList(Vec<String>),
    /// Legacy single codec-type field.
    CodecType(String),
    /// Legacy mute advertisement.
    AudioMuted(bool),
    /// Legacy mute advertisement.
    VideoMuted(bool),
    /// Uninterpreted extension attached to the focus's own presence.
    Opaque { name: String, payload: String },
}

impl PresenceExtension {
    /// Discriminator used for replace/remove-by-name operations on the
    /// own-presence builder.
    pub fn name(&self) -> &str {
        match self {
            PresenceExtension::UserInfo { .. } => "user-info",
            PresenceExtension::Caps { .. } => "caps",
            PresenceExtension::SourceInfo(_) => "source-info",
            PresenceExtension::Features(_) => "features",
            PresenceExtension::Region(_) => "region",
            PresenceExtension::StatsId(_) => "stats-id",
            PresenceExtension::CodecList(_) => "codec-list",
            PresenceExtension::CodecType(_) => "codec-type",
            PresenceExtension::AudioMuted(_) => "audio-muted",
            PresenceExtension::VideoMuted(_) => "video-muted",
            PresenceExtension::Opaque { name, .. } => name,
        }
    }
}

/// One decoded presence packet addressed to the local occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub from: OccupantId,
    pub kind: PresenceType,
    pub role: MucRole,
    pub affiliation: MucAffiliation,
    /// Real (login) address of the occupant when the room discloses it.
    /// Needed for trusted-domain gating of service-robot claims.
    pub real_jid: Option<String>,
    /// Room-service status codes (e.g. 307 on kick).
    pub status_codes: Vec<u32>,
    pub extensions: Vec<PresenceExtension>,
}

impl Presence {
    pub fn available(from: OccupantId, role: MucRole, affiliation: MucAffiliation) -> Self {
        Self {
            from,
            kind: PresenceType::Available,
            role,
            affiliation,
            real_jid: None,
            status_codes: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn unavailable(from: OccupantId) -> Self {
        Self {
            from,
            kind: PresenceType::Unavailable,
            role: MucRole::None,
            affiliation: MucAffiliation::None,
            real_jid: None,
            status_codes: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn with_real_jid(mut self, jid: impl Into<String>) -> Self {
        self.real_jid = Some(jid.into());
        self
    }

    pub fn with_extension(mut self, extension: PresenceExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_status_code(mut self, code: u32) -> Self {
        self.status_codes.push(code);
        self
    }

    pub fn is_kick(&self) -> bool {
        self.status_codes.contains(&STATUS_KICKED)
    }

    /// Domain of the real jid, when disclosed.
    pub fn real_domain(&self) -> Option<&str> {
        let jid = self.real_jid.as_deref()?;
        let bare = jid.split('/').next().unwrap_or(jid);
        bare.split('@').nth(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occupant_address_parts() {
        let occupant = OccupantId::from("room@conference.example.com/abcd1234");
        assert_eq!(occupant.room(), RoomId::from("room@conference.example.com"));
        assert_eq!(occupant.resource(), "abcd1234");
        assert_eq!(occupant.endpoint_id().as_str(), "abcd1234");
    }

    #[test]
    fn test_strict_endpoint_id_validation() {
        assert!(OccupantId::from("r@s/abcd1234").validate_endpoint_id(true));
        assert!(!OccupantId::from("r@s/ABCD1234").validate_endpoint_id(true));
        assert!(!OccupantId::from("r@s/nickname").validate_endpoint_id(true));
        assert!(OccupantId::from("r@s/nickname").validate_endpoint_id(false));
        assert!(!OccupantId::from("r@s").validate_endpoint_id(false));
    }

    #[test]
    fn test_real_domain_extraction() {
        let presence = Presence::available(
            OccupantId::from("r@s/n"),
            MucRole::Participant,
            MucAffiliation::None,
        )
        .with_real_jid("user@trusted.example.com/device");
        assert_eq!(presence.real_domain(), Some("trusted.example.com"));
    }

    #[test]
    fn test_kick_status_code() {
        let presence =
            Presence::unavailable(OccupantId::from("r@s/n")).with_status_code(STATUS_KICKED);
        assert!(presence.is_kick());
    }
}
