//! Core source model types.
//!
//! A [`Source`] is an immutable description of one RTP stream an
//! endpoint advertises; a [`SourceGroup`] ties several SSRCs together
//! under a grouping semantic. [`EndpointSourceSet`] is everything one
//! endpoint owns.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stable, room-scoped identifier of an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// RTP synchronization-source identifier.
///
/// Valid values are `1..=u32::MAX`; zero is reserved and rejected at
/// validation time. Wire values arrive as wider integers and go through
/// [`Ssrc::from_wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ssrc(pub u32);

impl Ssrc {
    /// Parse a wire-level integer. Rejects zero and anything that does
    /// not fit 32 bits.
    pub fn from_wire(value: u64) -> Option<Self> {
        if value == 0 || value > u32::MAX as u64 {
            None
        } else {
            Some(Self(value as u32))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Ssrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media type of a source.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

/// Advertised type of a video source.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    Camera,
    Desktop,
}

/// WebRTC media-stream / track identifier pair.
///
/// An `FID` pair shares the stream id between primary and
/// retransmission even when the track ids differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Msid {
    pub stream: String,
    pub track: String,
}

impl Msid {
    pub fn new(stream: impl Into<String>, track: impl Into<String>) -> Self {
        Self { stream: stream.into(), track: track.into() }
    }

    /// Parse the space-separated wire form `"<stream> <track>"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split_whitespace();
        let stream = parts.next()?;
        let track = parts.next().unwrap_or_default();
        Some(Self::new(stream, track))
    }
}

impl fmt::Display for Msid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.stream, self.track)
    }
}

/// One advertised RTP source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub ssrc: Ssrc,
    pub media_type: MediaType,
    /// Semantic source name (`<endpoint>-v0` style), when the endpoint
    /// supports source names.
    pub name: Option<String>,
    pub cname: Option<String>,
    pub msid: Option<Msid>,
    /// Only meaningful for video sources.
    pub video_type: Option<VideoType>,
}

impl Source {
    pub fn new(ssrc: Ssrc, media_type: MediaType) -> Self {
        Self { ssrc, media_type, name: None, cname: None, msid: None, video_type: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = Some(cname.into());
        self
    }

    pub fn with_msid(mut self, msid: Msid) -> Self {
        self.msid = Some(msid);
        self
    }

    pub fn with_video_type(mut self, video_type: VideoType) -> Self {
        self.video_type = Some(video_type);
        self
    }
}

/// Source-group semantics.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum GroupSemantics {
    /// Retransmission pair: primary followed by its RTX source.
    #[strum(serialize = "FID")]
    #[serde(rename = "FID")]
    Fid,
    /// Simulcast layers, low to high.
    #[strum(serialize = "SIM")]
    #[serde(rename = "SIM")]
    Sim,
    /// Forward error correction.
    #[strum(serialize = "FEC-FR")]
    #[serde(rename = "FEC-FR")]
    FecFr,
    /// RED redundant audio.
    #[strum(serialize = "RED")]
    #[serde(rename = "RED")]
    Red,
}

/// A semantic-tagged ordered list of SSRCs, scoped to one media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceGroup {
    pub semantics: GroupSemantics,
    pub ssrcs: Vec<Ssrc>,
}

impl SourceGroup {
    pub fn new(semantics: GroupSemantics, ssrcs: Vec<Ssrc>) -> Self {
        Self { semantics, ssrcs }
    }

    pub fn fid(primary: Ssrc, rtx: Ssrc) -> Self {
        Self::new(GroupSemantics::Fid, vec![primary, rtx])
    }

    pub fn sim(layers: Vec<Ssrc>) -> Self {
        Self::new(GroupSemantics::Sim, layers)
    }

    pub fn is_empty(&self) -> bool {
        self.ssrcs.is_empty()
    }

    /// First listed SSRC. For `FID` and `FEC-FR` this is the primary.
    pub fn primary(&self) -> Option<Ssrc> {
        self.ssrcs.first().copied()
    }

    pub fn contains(&self, ssrc: Ssrc) -> bool {
        self.ssrcs.contains(&ssrc)
    }
}

impl fmt::Display for SourceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.semantics)?;
        for (i, ssrc) in self.ssrcs.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", ssrc)?;
        }
        write!(f, ")")
    }
}

/// The sources and groups owned by a single endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSourceSet {
    /// Sources keyed by SSRC, in insertion order.
    pub sources: IndexMap<Ssrc, Source>,
    pub groups: Vec<SourceGroup>,
}

impl EndpointSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from plain lists. Later duplicates of an SSRC win.
    pub fn from_parts(sources: Vec<Source>, groups: Vec<SourceGroup>) -> Self {
        let mut set = Self::new();
        for source in sources {
            set.sources.insert(source.ssrc, source);
        }
        set.groups = groups;
        set
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.groups.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn get(&self, ssrc: Ssrc) -> Option<&Source> {
        self.sources.get(&ssrc)
    }

    pub fn has_ssrc(&self, ssrc: Ssrc) -> bool {
        self.sources.contains_key(&ssrc)
    }

    pub fn ssrcs(&self) -> impl Iterator<Item = Ssrc> + '_ {
        self.sources.keys().copied()
    }

    pub fn has_media(&self, media_type: MediaType) -> bool {
        self.sources.values().any(|s| s.media_type == media_type)
    }

    pub fn has_group(&self, group: &SourceGroup) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Groups of a given semantic.
    pub fn groups_of(&self, semantics: GroupSemantics) -> impl Iterator<Item = &SourceGroup> {
        self.groups.iter().filter(move |g| g.semantics == semantics)
    }

    /// Merge `other` into `self`, overwriting sources with equal SSRCs
    /// and skipping duplicate groups.
    pub fn merge(&mut self, other: &EndpointSourceSet) {
        for source in other.sources.values() {
            self.sources.insert(source.ssrc, source.clone());
        }
        for group in &other.groups {
            if !self.has_group(group) {
                self.groups.push(group.clone());
            }
        }
    }

    /// The part of `other` present in `self`: sources matched by SSRC,
    /// groups matched structurally.
    pub fn intersection(&self, other: &EndpointSourceSet) -> EndpointSourceSet {
        let mut result = EndpointSourceSet::new();
        for ssrc in other.sources.keys() {
            if let Some(source) = self.sources.get(ssrc) {
                result.sources.insert(*ssrc, source.clone());
            }
        }
        for group in &other.groups {
            if self.has_group(group) {
                result.groups.push(group.clone());
            }
        }
        result
    }

    /// Remove everything in `other` (sources by SSRC, groups
    /// structurally), returning what was actually removed.
    pub fn subtract(&mut self, other: &EndpointSourceSet) -> EndpointSourceSet {
        let mut removed = EndpointSourceSet::new();
        for ssrc in other.sources.keys() {
            if let Some(source) = self.sources.shift_remove(ssrc) {
                removed.sources.insert(*ssrc, source);
            }
        }
        let mut kept = Vec::with_capacity(self.groups.len());
        for group in self.groups.drain(..) {
            if other.has_group(&group) {
                removed.groups.push(group);
            } else {
                kept.push(group);
            }
        }
        self.groups = kept;
        removed
    }

    /// Reduce simulcast to the first (lowest) layer: secondary `SIM`
    /// layers, their `FID` partners and the `SIM` groups themselves are
    /// dropped. Used when building offers for endpoints that must not
    /// receive simulcast.
    pub fn strip_simulcast(&self) -> EndpointSourceSet {
        let mut dropped: HashSet<Ssrc> = HashSet::new();
        for sim in self.groups_of(GroupSemantics::Sim) {
            for ssrc in sim.ssrcs.iter().skip(1) {
                dropped.insert(*ssrc);
            }
        }
        // RTX partners of dropped layers go too.
        for fid in self.groups_of(GroupSemantics::Fid) {
            if fid.primary().map(|p| dropped.contains(&p)).unwrap_or(false) {
                for ssrc in &fid.ssrcs {
                    dropped.insert(*ssrc);
                }
            }
        }

        let mut result = EndpointSourceSet::new();
        for source in self.sources.values() {
            if !dropped.contains(&source.ssrc) {
                result.sources.insert(source.ssrc, source.clone());
            }
        }
        for group in &self.groups {
            if group.semantics == GroupSemantics::Sim {
                continue;
            }
            if group.ssrcs.iter().any(|s| dropped.contains(s)) {
                continue;
            }
            result.groups.push(group.clone());
        }
        result
    }
}

impl fmt::Display for EndpointSourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[sources={:?} groups={}]",
            self.sources.keys().map(|s| s.0).collect::<Vec<_>>(),
            self.groups.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(ssrc: u32) -> Source {
        Source::new(Ssrc(ssrc), MediaType::Video)
            .with_cname("cname")
            .with_msid(Msid::new("stream", "track"))
    }

    #[test]
    fn test_ssrc_wire_bounds() {
        assert_eq!(Ssrc::from_wire(0), None);
        assert_eq!(Ssrc::from_wire(1), Some(Ssrc(1)));
        assert_eq!(Ssrc::from_wire(u32::MAX as u64), Some(Ssrc(u32::MAX)));
        assert_eq!(Ssrc::from_wire(u32::MAX as u64 + 1), None);
    }

    #[test]
    fn test_group_semantics_wire_names() {
        assert_eq!(GroupSemantics::Fid.to_string(), "FID");
        assert_eq!(GroupSemantics::FecFr.to_string(), "FEC-FR");
        assert_eq!("SIM".parse::<GroupSemantics>().unwrap(), GroupSemantics::Sim);
        assert!("BUNDLE".parse::<GroupSemantics>().is_err());
    }

    #[test]
    fn test_merge_and_subtract_round_trip() {
        let mut set = EndpointSourceSet::from_parts(
            vec![video(1), video(2)],
            vec![SourceGroup::fid(Ssrc(1), Ssrc(2))],
        );
        let extra = EndpointSourceSet::from_parts(vec![video(3)], vec![]);

        set.merge(&extra);
        assert_eq!(set.source_count(), 3);

        let removed = set.subtract(&extra);
        assert_eq!(removed.source_count(), 1);
        assert!(removed.has_ssrc(Ssrc(3)));
        assert_eq!(set.source_count(), 2);
    }

    #[test]
    fn test_strip_simulcast_keeps_first_layer_and_its_rtx() {
        let sources: Vec<Source> = (1..=6).map(video).collect();
        let groups = vec![
            SourceGroup::sim(vec![Ssrc(1), Ssrc(3), Ssrc(5)]),
            SourceGroup::fid(Ssrc(1), Ssrc(2)),
            SourceGroup::fid(Ssrc(3), Ssrc(4)),
            SourceGroup::fid(Ssrc(5), Ssrc(6)),
        ];
        let set = EndpointSourceSet::from_parts(sources, groups);

        let stripped = set.strip_simulcast();
        assert_eq!(stripped.ssrcs().collect::<Vec<_>>(), vec![Ssrc(1), Ssrc(2)]);
        assert_eq!(stripped.groups, vec![SourceGroup::fid(Ssrc(1), Ssrc(2))]);
    }

    #[test]
    fn test_msid_parse() {
        let msid = Msid::parse("stream-id track-id").unwrap();
        assert_eq!(msid.stream, "stream-id");
        assert_eq!(msid.track, "track-id");
        assert_eq!(msid.to_string(), "stream-id track-id");
    }
}
