//! Conference-wide source bookkeeping with strict validation.
//!
//! Every mutation either commits completely or leaves the map
//! untouched. The invariants enforced here:
//!
//! 1. No SSRC appears in more than one endpoint.
//! 2. Within an endpoint no two sources share an SSRC; SSRC 0 is
//!    rejected.
//! 3. Sources sharing an `msid` must belong to the same `FID` /
//!    `SIM`-family of groups.
//! 4. No two `SIM` groups share an `msid`; `FID` groups share one only
//!    within a common `SIM` family; grouped sources carry an `msid`
//!    (`FEC-FR` secondaries inherit from their primary).
//! 5. Each `SIM` primary has its own `FID` partner.
//! 6. Removals that would break any of the above are rejected whole.

use std::collections::{HashMap, HashSet};

use super::types::{
    EndpointId, EndpointSourceSet, GroupSemantics, MediaType, Msid, SourceGroup, Ssrc,
};

/// Why a source mutation was rejected. Surfaced to the offending
/// participant as a negative acknowledgement; the map is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// SSRC zero or out of the 32-bit range
    #[error("invalid ssrc: {0}")]
    InvalidSsrc(u64),

    /// The SSRC is already advertised, by this endpoint with different
    /// attributes or by another endpoint
    #[error("duplicate ssrc {ssrc} (owned by {owner})")]
    DuplicateSsrc { ssrc: Ssrc, owner: EndpointId },

    /// Sources share an msid without the group structure that permits it
    #[error("msid conflict: {0}")]
    MsidConflict(String),

    /// A group references an SSRC the endpoint does not advertise, or a
    /// required group partner is absent
    #[error("group {group} references missing source {ssrc}")]
    GroupedSourceMissing { group: String, ssrc: Ssrc },

    /// A group mixes media types
    #[error("group {group} mixes media types")]
    GroupMediaMismatch { group: String },

    /// A visitor attempted to change advertised media
    #[error("visitors may not change advertised sources or codecs")]
    VisitorCodecChange,

    /// Per-endpoint source ceiling reached
    #[error("source limit of {limit} per endpoint exceeded")]
    Limit { limit: usize },
}

/// Default per-endpoint source ceiling.
pub const DEFAULT_MAX_SOURCES_PER_ENDPOINT: usize = 50;

/// Mapping from endpoint id to its validated source set.
///
/// All operations are expected to run on the owning conference's serial
/// queue; the map itself is single-threaded state.
#[derive(Debug, Clone, Default)]
pub struct ConferenceSourceMap {
    endpoints: HashMap<EndpointId, EndpointSourceSet>,
    /// SSRC -> owning endpoint, rebuilt incrementally on mutation.
    ssrc_owner: HashMap<Ssrc, EndpointId>,
    max_sources_per_endpoint: usize,
}

impl ConferenceSourceMap {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_SOURCES_PER_ENDPOINT)
    }

    pub fn with_limit(max_sources_per_endpoint: usize) -> Self {
        Self {
            endpoints: HashMap::new(),
            ssrc_owner: HashMap::new(),
            max_sources_per_endpoint,
        }
    }

    /// Attempt to merge `set` into `endpoint`'s sources.
    ///
    /// Returns exactly the subset that was added; entries already
    /// present are silently ignored. On any invariant violation the map
    /// is left unchanged.
    pub fn try_add(
        &mut self,
        endpoint: &EndpointId,
        set: EndpointSourceSet,
    ) -> Result<EndpointSourceSet, ValidationError> {
        let current = self.endpoints.get(endpoint).cloned().unwrap_or_default();

        let mut accepted = EndpointSourceSet::new();
        for source in set.sources.values() {
            if !source.ssrc.is_valid() {
                return Err(ValidationError::InvalidSsrc(source.ssrc.0 as u64));
            }
            match self.ssrc_owner.get(&source.ssrc) {
                Some(owner) if owner != endpoint => {
                    return Err(ValidationError::DuplicateSsrc {
                        ssrc: source.ssrc,
                        owner: owner.clone(),
                    });
                }
                Some(_) => {
                    // Same endpoint: identical re-advertisement is a
                    // no-op, anything else is a conflict.
                    if current.get(source.ssrc) != Some(source) {
                        return Err(ValidationError::DuplicateSsrc {
                            ssrc: source.ssrc,
                            owner: endpoint.clone(),
                        });
                    }
                }
                None => {
                    accepted.sources.insert(source.ssrc, source.clone());
                }
            }
        }

        // Empty groups are parser artifacts; duplicates are deduped
        // against both the current state and the rest of the input.
        for group in &set.groups {
            if group.is_empty() {
                continue;
            }
            if !current.has_group(group) && !accepted.has_group(group) {
                accepted.groups.push(group.clone());
            }
        }

        if current.source_count() + accepted.source_count() > self.max_sources_per_endpoint {
            return Err(ValidationError::Limit { limit: self.max_sources_per_endpoint });
        }

        let mut tentative = current;
        tentative.merge(&accepted);
        validate_endpoint_set(&tentative)?;

        for ssrc in accepted.ssrcs() {
            self.ssrc_owner.insert(ssrc, endpoint.clone());
        }
        self.endpoints.insert(endpoint.clone(), tentative);
        Ok(accepted)
    }

    /// Remove the intersection of `set` with `endpoint`'s current
    /// sources and groups.
    ///
    /// Fails atomically when the remainder would violate an invariant,
    /// e.g. an `FID` group left with a single leg.
    pub fn try_remove(
        &mut self,
        endpoint: &EndpointId,
        set: &EndpointSourceSet,
    ) -> Result<EndpointSourceSet, ValidationError> {
        let Some(current) = self.endpoints.get(endpoint) else {
            return Ok(EndpointSourceSet::new());
        };

        let mut tentative = current.clone();
        let removed = tentative.subtract(set);
        if removed.is_empty() {
            return Ok(removed);
        }

        validate_endpoint_set(&tentative)?;

        for ssrc in removed.ssrcs() {
            self.ssrc_owner.remove(&ssrc);
        }
        if tentative.is_empty() {
            self.endpoints.remove(endpoint);
        } else {
            self.endpoints.insert(endpoint.clone(), tentative);
        }
        Ok(removed)
    }

    /// Drop an endpoint entirely, returning what it owned.
    pub fn remove_endpoint(&mut self, endpoint: &EndpointId) -> Option<EndpointSourceSet> {
        let set = self.endpoints.remove(endpoint)?;
        for ssrc in set.ssrcs() {
            self.ssrc_owner.remove(&ssrc);
        }
        Some(set)
    }

    /// Current sources of one endpoint.
    pub fn get(&self, endpoint: &EndpointId) -> Option<&EndpointSourceSet> {
        self.endpoints.get(endpoint)
    }

    /// Owned copy of one endpoint's sources.
    pub fn snapshot_endpoint(&self, endpoint: &EndpointId) -> EndpointSourceSet {
        self.endpoints.get(endpoint).cloned().unwrap_or_default()
    }

    /// Owned copy of the whole map.
    pub fn snapshot(&self) -> HashMap<EndpointId, EndpointSourceSet> {
        self.endpoints.clone()
    }

    pub fn owner_of(&self, ssrc: Ssrc) -> Option<&EndpointId> {
        self.ssrc_owner.get(&ssrc)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&EndpointId, &EndpointSourceSet)> {
        self.endpoints.iter()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn total_source_count(&self) -> usize {
        self.endpoints.values().map(|s| s.source_count()).sum()
    }
}

/// Check all endpoint-internal invariants on a candidate set.
fn validate_endpoint_set(set: &EndpointSourceSet) -> Result<(), ValidationError> {
    for group in &set.groups {
        validate_group(set, group)?;
    }
    validate_msid_sharing(set)?;
    validate_sim_fid_pairing(set)?;
    Ok(())
}

/// Per-group checks: member presence, media-type equality, cname/msid
/// coherence per the group semantic.
fn validate_group(set: &EndpointSourceSet, group: &SourceGroup) -> Result<(), ValidationError> {
    let mut media: Option<MediaType> = None;
    let mut cname: Option<&Option<String>> = None;
    let mut primary_msid: Option<&Option<Msid>> = None;

    for (i, ssrc) in group.ssrcs.iter().enumerate() {
        let Some(source) = set.get(*ssrc) else {
            return Err(ValidationError::GroupedSourceMissing {
                group: group.to_string(),
                ssrc: *ssrc,
            });
        };

        if *media.get_or_insert(source.media_type) != source.media_type {
            return Err(ValidationError::GroupMediaMismatch { group: group.to_string() });
        }
        if *cname.get_or_insert(&source.cname) != &source.cname {
            return Err(ValidationError::MsidConflict(format!(
                "cname mismatch within {}",
                group
            )));
        }

        // FEC-FR secondaries inherit the primary's msid and may omit
        // their own; everything else in a group must carry one.
        let fec_secondary = group.semantics == GroupSemantics::FecFr && i > 0;
        if source.msid.is_none() && !fec_secondary {
            return Err(ValidationError::MsidConflict(format!(
                "grouped source {} has no msid",
                ssrc
            )));
        }

        if let Some(msid) = &source.msid {
            match primary_msid.get_or_insert(&source.msid) {
                Some(first) => {
                    let matches = match group.semantics {
                        // An FID pair shares the stream; track ids may
                        // differ between primary and RTX.
                        GroupSemantics::Fid => first.stream == msid.stream,
                        _ => *first == *msid,
                    };
                    if !matches {
                        return Err(ValidationError::MsidConflict(format!(
                            "msid mismatch within {}",
                            group
                        )));
                    }
                }
                None => {}
            }
        }
    }
    Ok(())
}

/// Sources sharing an msid must be tied together by groups: directly by
/// one `FID`/`SIM` group, or transitively through a `SIM` family. Two
/// distinct `SIM` groups never share an msid; two `FID` groups share
/// one only when their primaries sit in a common `SIM` group.
fn validate_msid_sharing(set: &EndpointSourceSet) -> Result<(), ValidationError> {
    let mut by_msid: HashMap<&Msid, Vec<Ssrc>> = HashMap::new();
    for source in set.sources.values() {
        if let Some(msid) = &source.msid {
            by_msid.entry(msid).or_default().push(source.ssrc);
        }
    }

    let families = group_families(set);

    for (msid, ssrcs) in by_msid {
        if ssrcs.len() < 2 {
            continue;
        }
        let family = families.get(&ssrcs[0]).copied();
        for ssrc in &ssrcs[1..] {
            if family.is_none() || families.get(ssrc).copied() != family {
                return Err(ValidationError::MsidConflict(format!(
                    "sources {:?} share msid '{}' without a common group family",
                    ssrcs.iter().map(|s| s.0).collect::<Vec<_>>(),
                    msid
                )));
            }
        }

        let sim_touching = set
            .groups_of(GroupSemantics::Sim)
            .filter(|g| g.ssrcs.iter().any(|s| ssrcs.contains(s)))
            .count();
        if sim_touching > 1 {
            return Err(ValidationError::MsidConflict(format!(
                "multiple SIM groups share msid '{}'",
                msid
            )));
        }
        let fid_touching = set
            .groups_of(GroupSemantics::Fid)
            .filter(|g| g.ssrcs.iter().any(|s| ssrcs.contains(s)))
            .count();
        if fid_touching > 1 && sim_touching == 0 {
            return Err(ValidationError::MsidConflict(format!(
                "multiple FID groups share msid '{}' outside a SIM family",
                msid
            )));
        }
    }
    Ok(())
}

/// Each `SIM` primary needs a dedicated `FID` partner.
fn validate_sim_fid_pairing(set: &EndpointSourceSet) -> Result<(), ValidationError> {
    let fid_primaries: HashSet<Ssrc> =
        set.groups_of(GroupSemantics::Fid).filter_map(|g| g.primary()).collect();
    for sim in set.groups_of(GroupSemantics::Sim) {
        for layer in &sim.ssrcs {
            if !fid_primaries.contains(layer) {
                return Err(ValidationError::GroupedSourceMissing {
                    group: sim.to_string(),
                    ssrc: *layer,
                });
            }
        }
    }
    Ok(())
}

/// Union-find over SSRCs joined by shared `FID`/`SIM`/`FEC-FR`/`RED`
/// membership; the representative identifies the group family.
fn group_families(set: &EndpointSourceSet) -> HashMap<Ssrc, Ssrc> {
    let mut parent: HashMap<Ssrc, Ssrc> = HashMap::new();

    fn find(parent: &mut HashMap<Ssrc, Ssrc>, s: Ssrc) -> Ssrc {
        let p = *parent.entry(s).or_insert(s);
        if p == s {
            s
        } else {
            let root = find(parent, p);
            parent.insert(s, root);
            root
        }
    }

    for group in &set.groups {
        if let Some(first) = group.primary() {
            for ssrc in &group.ssrcs[1..] {
                let a = find(&mut parent, first);
                let b = find(&mut parent, *ssrc);
                if a != b {
                    parent.insert(b, a);
                }
            }
        }
    }

    let keys: Vec<Ssrc> = parent.keys().copied().collect();
    let mut roots = HashMap::with_capacity(keys.len());
    for key in keys {
        let root = find(&mut parent, key);
        roots.insert(key, root);
    }
    roots
}
