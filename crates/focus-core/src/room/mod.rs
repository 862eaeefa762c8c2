//! Chat-room state tracker.
//!
//! Parses presence updates, classifies occupants and maintains mute /
//! source-advertisement state, exposing the result as typed events.

mod events;
mod json;
mod member;
mod metadata;
mod presence;
mod room;
mod source_info;

pub use events::ChatRoomEvent;
pub use json::JsonParseError;
pub use member::{ChatRoomMember, Feature, MemberRole, RoleChange};
pub use metadata::{RoomMetadata, StartMutedPolicy};
pub use presence::{
    MucAffiliation, MucRole, OccupantId, Presence, PresenceExtension, PresenceType, RoomId,
    STATUS_KICKED,
};
pub use room::{ChatRoom, NullPresenceSender, PresenceSender, RoomConfigForm};
pub use source_info::{parse_source_info, SourceInfo};
