//! RTP source model and conference-wide validation.
//!
//! Sources and source groups are the only objects a participant may
//! advertise on the wire. [`ConferenceSourceMap`] is the per-conference
//! bookkeeping of who owns which SSRC, with strict consistency rules
//! enforced atomically at every mutation.

mod map;
mod types;

pub use map::{ConferenceSourceMap, ValidationError};
pub use types::{
    EndpointId, EndpointSourceSet, GroupSemantics, MediaType, Msid, Source, SourceGroup, Ssrc,
    VideoType,
};
