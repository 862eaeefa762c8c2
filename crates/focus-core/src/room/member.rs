//! Per-member state derived from presence.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::config::FocusConfig;
use crate::source::{EndpointId, MediaType};

use super::presence::{MucAffiliation, MucRole, OccupantId, Presence, PresenceExtension};
use super::source_info::{parse_source_info, SourceInfo};

/// Role of a member as the focus sees it.
///
/// Ordered by privilege so that comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemberRole {
    Visitor,
    Participant,
    Moderator,
    Owner,
}

impl MemberRole {
    /// Derive from the room-service occupant fields.
    pub fn from_muc(role: MucRole, affiliation: MucAffiliation) -> Self {
        match (role, affiliation) {
            (MucRole::Visitor, _) => MemberRole::Visitor,
            (_, MucAffiliation::Owner) => MemberRole::Owner,
            (MucRole::Moderator, _) => MemberRole::Moderator,
            _ => MemberRole::Participant,
        }
    }

    pub fn is_visitor(&self) -> bool {
        matches!(self, MemberRole::Visitor)
    }

    pub fn is_moderator(&self) -> bool {
        *self >= MemberRole::Moderator
    }
}

/// Media-session capabilities a member advertises via feature strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum Feature {
    Audio,
    Video,
    Sctp,
    Rtx,
    Remb,
    Tcc,
    SourceNames,
    JsonSources,
    SsrcRewriting,
    Red,
}

/// Feature strings that mark service robots; only honored when the
/// claiming member's real domain is in the trusted list.
const FEATURE_JIBRI: &str = "jibri";
const FEATURE_JIGASI: &str = "jigasi";
const FEATURE_TRANSCRIBER: &str = "transcriber";

/// Outcome of applying a role update to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleChange {
    Unchanged,
    Applied { old: MemberRole, new: MemberRole },
    /// Visitor <-> non-visitor transitions are not supported; the
    /// previous role is kept so downstream counts stay correct.
    RefusedVisitorTransition { kept: MemberRole, refused: MemberRole },
}

/// A chat-room occupant and everything derived from its presence.
#[derive(Debug, Clone)]
pub struct ChatRoomMember {
    pub occupant: OccupantId,
    pub endpoint_id: EndpointId,
    pub role: MemberRole,
    pub is_robot: bool,
    /// XEP-0115 node#ver capability string.
    pub caps: Option<String>,
    pub source_infos: HashMap<String, SourceInfo>,
    /// Whether a source-info payload has ever been seen; gates the
    /// legacy mute fallback.
    pub has_source_info: bool,
    pub legacy_audio_muted: bool,
    pub legacy_video_muted: bool,
    pub region: Option<String>,
    pub stats_id: Option<String>,
    /// Preferred video codecs, most preferred first.
    pub video_codecs: Vec<String>,
    pub features: HashSet<Feature>,
    pub is_jibri: bool,
    pub is_jigasi: bool,
    pub is_transcriber: bool,
    pub joined_at: Instant,
}

impl ChatRoomMember {
    /// Build the initial state from a join presence.
    pub fn from_presence(presence: &Presence, config: &FocusConfig) -> Self {
        let mut member = Self {
            occupant: presence.from.clone(),
            endpoint_id: presence.from.endpoint_id(),
            role: MemberRole::from_muc(presence.role, presence.affiliation),
            is_robot: false,
            caps: None,
            source_infos: HashMap::new(),
            has_source_info: false,
            // Legacy default: a member that advertises nothing is muted.
            legacy_audio_muted: true,
            legacy_video_muted: true,
            region: None,
            stats_id: None,
            video_codecs: Vec::new(),
            features: HashSet::new(),
            is_jibri: false,
            is_jigasi: false,
            is_transcriber: false,
            joined_at: Instant::now(),
        };
        member.update_from_presence(presence, config);
        member
    }

    /// Fold a presence update into the member state. Role updates go
    /// through [`ChatRoomMember::apply_role`] separately so the caller
    /// can react to refused transitions.
    pub fn update_from_presence(&mut self, presence: &Presence, config: &FocusConfig) {
        let trusted = presence
            .real_domain()
            .map(|d| config.trusted_domains.iter().any(|t| t == d))
            .unwrap_or(false);

        for extension in &presence.extensions {
            match extension {
                PresenceExtension::UserInfo { robot } => self.is_robot = *robot,
                PresenceExtension::Caps { node, ver } => {
                    self.caps = Some(format!("{}#{}", node, ver));
                }
                PresenceExtension::SourceInfo(raw) => match parse_source_info(raw) {
                    Ok(infos) => {
                        self.source_infos = infos;
                        self.has_source_info = true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Discarding malformed source-info from {}: {}",
                            self.occupant,
                            e
                        );
                    }
                },
                PresenceExtension::Features(raw_features) => {
                    self.features = raw_features
                        .iter()
                        .filter_map(|f| f.parse::<Feature>().ok())
                        .collect();
                    if trusted {
                        self.is_jibri = raw_features.iter().any(|f| f == FEATURE_JIBRI);
                        self.is_jigasi = raw_features.iter().any(|f| f == FEATURE_JIGASI);
                        self.is_transcriber =
                            raw_features.iter().any(|f| f == FEATURE_TRANSCRIBER);
                    } else if raw_features.iter().any(|f| {
                        f == FEATURE_JIBRI || f == FEATURE_JIGASI || f == FEATURE_TRANSCRIBER
                    }) {
                        tracing::warn!(
                            "Ignoring service-robot claim from untrusted domain: {}",
                            self.occupant
                        );
                    }
                }
                PresenceExtension::Region(region) => self.region = Some(region.clone()),
                PresenceExtension::StatsId(id) => self.stats_id = Some(id.clone()),
                PresenceExtension::CodecList(codecs) => {
                    self.video_codecs = normalize_codec_list(codecs.clone());
                }
                PresenceExtension::CodecType(codec) => {
                    if self.video_codecs.is_empty() {
                        self.video_codecs = normalize_codec_list(vec![codec.clone()]);
                    }
                }
                PresenceExtension::AudioMuted(muted) => self.legacy_audio_muted = *muted,
                PresenceExtension::VideoMuted(muted) => self.legacy_video_muted = *muted,
                PresenceExtension::Opaque { .. } => {}
            }
        }
    }

    /// Apply a role reported by the room service, refusing visitor
    /// transitions.
    pub fn apply_role(&mut self, role: MucRole, affiliation: MucAffiliation) -> RoleChange {
        let new = MemberRole::from_muc(role, affiliation);
        if new == self.role {
            return RoleChange::Unchanged;
        }
        if new.is_visitor() != self.role.is_visitor() {
            return RoleChange::RefusedVisitorTransition { kept: self.role, refused: new };
        }
        let old = std::mem::replace(&mut self.role, new);
        RoleChange::Applied { old, new }
    }

    /// Whether this member currently contributes to the sender count of
    /// `media_type`.
    pub fn is_sender_of(&self, media_type: MediaType) -> bool {
        if self.has_source_info {
            self.source_infos.values().any(|i| i.is_sender_of(media_type))
        } else {
            match media_type {
                MediaType::Audio => !self.legacy_audio_muted,
                MediaType::Video => !self.legacy_video_muted,
            }
        }
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn is_service_robot(&self) -> bool {
        self.is_jibri || self.is_jigasi || self.is_transcriber
    }
}

/// Codec preferences keep their advertised order; vp8 is appended as
/// the interop floor when absent.
fn normalize_codec_list(mut codecs: Vec<String>) -> Vec<String> {
    for codec in codecs.iter_mut() {
        *codec = codec.to_ascii_lowercase();
    }
    if !codecs.iter().any(|c| c == "vp8") {
        codecs.push("vp8".to_string());
    }
    codecs
}
