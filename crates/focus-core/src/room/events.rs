//! Chat-room events.

use super::member::MemberRole;
use super::metadata::RoomMetadata;
use super::presence::OccupantId;

/// Higher-level events derived from the presence stream.
///
/// Dispatch is synchronous, inside the room lock, so listener order
/// matches wire order. Listeners must bounce onto their own queue for
/// anything heavier than bookkeeping and must not call back into the
/// room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRoomEvent {
    MemberJoined(OccupantId),
    MemberLeft(OccupantId),
    MemberKicked(OccupantId),
    RoleChanged { occupant: OccupantId, role: MemberRole },
    SourceInfoChanged(OccupantId),
    AudioSendersCountChanged(usize),
    VideoSendersCountChanged(usize),
    ConfigReloaded,
    MetadataUpdated(RoomMetadata),
    RoomDestroyed { reason: Option<String> },
}
