//! Chat-room state tracking.
//!
//! Consumes the presence stream addressed to the local occupant and
//! produces [`ChatRoomEvent`]s. All mutation happens under a single
//! lock held for the duration of one `process_presence` call; listener
//! dispatch happens inside the lock so ordering matches wire order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use focus_common::{EventEmitter, SlidingWindowCounter};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::FocusConfig;
use crate::source::MediaType;

use super::events::ChatRoomEvent;
use super::member::{ChatRoomMember, MemberRole, RoleChange};
use super::metadata::RoomMetadata;
use super::presence::{OccupantId, Presence, PresenceExtension, PresenceType, RoomId};

/// Outbound own-presence sink; the transport adapter implements this.
pub trait PresenceSender: Send + Sync {
    /// Send the full current extension set as one presence update.
    fn send_presence(&self, extensions: &[PresenceExtension]);
}

/// No-op sender for tests and for rooms joined in read-only mode.
#[derive(Debug, Default)]
pub struct NullPresenceSender;

impl PresenceSender for NullPresenceSender {
    fn send_presence(&self, _extensions: &[PresenceExtension]) {}
}

/// Recognized keys of the room configuration form, read when the local
/// user joins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomConfigForm {
    pub meeting_id: Option<String>,
    pub is_breakout: bool,
    pub main_room: Option<String>,
    /// Lobby: only members may enter.
    pub members_only: bool,
    pub visitors_enabled: Option<bool>,
    pub participants_soft_limit: Option<u32>,
    pub presets_enabled: bool,
}

#[derive(Debug)]
struct RoomState {
    members: HashMap<OccupantId, ChatRoomMember>,
    audio_senders: usize,
    video_senders: usize,
    pending_visitors: SlidingWindowCounter,
    form: RoomConfigForm,
    metadata: Option<RoomMetadata>,
    own_presence: Vec<PresenceExtension>,
    destroyed: bool,
}

/// Presence-driven membership state for one chat room.
pub struct ChatRoom {
    room_id: RoomId,
    config: Arc<FocusConfig>,
    state: Mutex<RoomState>,
    emitter: EventEmitter<ChatRoomEvent>,
    presence_sender: Arc<dyn PresenceSender>,
    metadata_arrived: Notify,
}

impl ChatRoom {
    pub fn new(
        room_id: RoomId,
        config: Arc<FocusConfig>,
        presence_sender: Arc<dyn PresenceSender>,
    ) -> Self {
        let window = config.visitor.join_latency_window();
        Self {
            room_id,
            config,
            state: Mutex::new(RoomState {
                members: HashMap::new(),
                audio_senders: 0,
                video_senders: 0,
                pending_visitors: SlidingWindowCounter::new(window),
                form: RoomConfigForm::default(),
                metadata: None,
                own_presence: Vec::new(),
                destroyed: false,
            }),
            emitter: EventEmitter::new(),
            presence_sender,
            metadata_arrived: Notify::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Register a listener for room events.
    pub fn subscribe<F>(&self, name: &str, listener: F)
    where
        F: Fn(&ChatRoomEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(name, listener);
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.emitter.unsubscribe(name)
    }

    /// Process one presence packet. Serialized by the room lock; events
    /// fire synchronously before the call returns.
    pub fn process_presence(&self, presence: &Presence) {
        let mut state = self.state.lock();
        if state.destroyed {
            tracing::debug!("Ignoring presence for destroyed room {}", self.room_id);
            return;
        }

        match presence.kind {
            PresenceType::Unavailable => self.process_leave(&mut state, presence),
            PresenceType::Available => self.process_available(&mut state, presence),
        }
    }

    fn process_available(&self, state: &mut RoomState, presence: &Presence) {
        if !presence.from.validate_endpoint_id(self.config.use_jid_validation) {
            tracing::warn!("Discarding presence with invalid occupant address: {}", presence.from);
            return;
        }

        let is_new = !state.members.contains_key(&presence.from);
        if is_new {
            let member = ChatRoomMember::from_presence(presence, &self.config);
            if member.role.is_visitor() {
                // The invite slot this visitor held is now a real join.
                state.pending_visitors.consume_one(Instant::now());
            }
            tracing::info!(
                "Member joined {}: role={:?} robot={}",
                member.occupant,
                member.role,
                member.is_robot
            );
            state.members.insert(presence.from.clone(), member);
            self.emitter.emit(&ChatRoomEvent::MemberJoined(presence.from.clone()));
        } else {
            let member = state.members.get_mut(&presence.from).expect("checked above");
            let had_sources = member.source_infos.clone();

            match member.apply_role(presence.role, presence.affiliation) {
                RoleChange::Unchanged => {}
                RoleChange::Applied { old, new } => {
                    tracing::info!("Role of {} changed {:?} -> {:?}", presence.from, old, new);
                    self.emitter.emit(&ChatRoomEvent::RoleChanged {
                        occupant: presence.from.clone(),
                        role: new,
                    });
                }
                RoleChange::RefusedVisitorTransition { kept, refused } => {
                    tracing::warn!(
                        "Refusing visitor role transition for {} ({:?} -> {:?})",
                        presence.from,
                        kept,
                        refused
                    );
                }
            }

            let member = state.members.get_mut(&presence.from).expect("checked above");
            member.update_from_presence(presence, &self.config);
            if member.source_infos != had_sources {
                self.emitter.emit(&ChatRoomEvent::SourceInfoChanged(presence.from.clone()));
            }
        }

        self.refresh_sender_counts(state);
    }

    fn process_leave(&self, state: &mut RoomState, presence: &Presence) {
        let Some(member) = state.members.remove(&presence.from) else {
            tracing::debug!("Leave for unknown occupant {}", presence.from);
            return;
        };
        tracing::info!("Member left {}: kicked={}", member.occupant, presence.is_kick());
        if presence.is_kick() {
            self.emitter.emit(&ChatRoomEvent::MemberKicked(presence.from.clone()));
        } else {
            self.emitter.emit(&ChatRoomEvent::MemberLeft(presence.from.clone()));
        }
        self.refresh_sender_counts(state);
    }

    /// Recompute sender tallies from member state and emit deltas. The
    /// counts can never go negative: they are derived, not decremented.
    fn refresh_sender_counts(&self, state: &mut RoomState) {
        let audio =
            state.members.values().filter(|m| m.is_sender_of(MediaType::Audio)).count();
        let video =
            state.members.values().filter(|m| m.is_sender_of(MediaType::Video)).count();

        if audio != state.audio_senders {
            state.audio_senders = audio;
            self.emitter.emit(&ChatRoomEvent::AudioSendersCountChanged(audio));
        }
        if video != state.video_senders {
            state.video_senders = video;
            self.emitter.emit(&ChatRoomEvent::VideoSendersCountChanged(video));
        }
    }

    pub fn member(&self, occupant: &OccupantId) -> Option<ChatRoomMember> {
        self.state.lock().members.get(occupant).cloned()
    }

    pub fn members(&self) -> Vec<ChatRoomMember> {
        self.state.lock().members.values().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn audio_senders_count(&self) -> usize {
        self.state.lock().audio_senders
    }

    pub fn video_senders_count(&self) -> usize {
        self.state.lock().video_senders
    }

    /// Joined visitors plus invited-but-not-yet-joined ones still inside
    /// the latency window, so admission control does not double-book.
    pub fn visitor_count(&self) -> usize {
        let mut state = self.state.lock();
        let joined = state.members.values().filter(|m| m.role.is_visitor()).count();
        joined + state.pending_visitors.count(Instant::now())
    }

    /// Record that a visitor was invited and may join shortly.
    pub fn record_visitor_invite(&self) {
        self.state.lock().pending_visitors.record(Instant::now());
    }

    /// Whether the room currently has an owner.
    pub fn has_owner(&self) -> bool {
        self.state.lock().members.values().any(|m| m.role == MemberRole::Owner)
    }

    // ---- configuration form and metadata ----

    /// Install the configuration form read at join time.
    pub fn set_config_form(&self, form: RoomConfigForm) {
        {
            let mut state = self.state.lock();
            state.form = form;
        }
        self.emitter.emit(&ChatRoomEvent::ConfigReloaded);
    }

    pub fn config_form(&self) -> RoomConfigForm {
        self.state.lock().form.clone()
    }

    pub fn meeting_id(&self) -> Option<String> {
        self.state.lock().form.meeting_id.clone()
    }

    /// Fold in a room-metadata message.
    pub fn apply_metadata(&self, metadata: RoomMetadata) {
        {
            let mut state = self.state.lock();
            state.metadata = Some(metadata.clone());
        }
        self.metadata_arrived.notify_waiters();
        self.emitter.emit(&ChatRoomEvent::MetadataUpdated(metadata));
    }

    pub fn metadata(&self) -> Option<RoomMetadata> {
        self.state.lock().metadata.clone()
    }

    /// Effective visitors-enabled flag: metadata arrives after the
    /// join-time form read, so the last write wins.
    pub fn visitors_enabled(&self) -> Option<bool> {
        let state = self.state.lock();
        state
            .metadata
            .as_ref()
            .and_then(|m| m.visitors_enabled)
            .or(state.form.visitors_enabled)
    }

    /// Block for up to `timeout` waiting for a room-metadata message;
    /// used when conference presets are enabled. Returns whether one
    /// arrived.
    pub async fn await_metadata(&self, timeout: Duration) -> bool {
        if self.state.lock().metadata.is_some() {
            return true;
        }
        tokio::select! {
            _ = self.metadata_arrived.notified() => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!("Timed out waiting for room metadata in {}", self.room_id);
                false
            }
        }
    }

    // ---- own presence builder ----

    /// Replace (or add) the extension with the same name. Emits one
    /// update when the presence actually changed.
    pub fn set_presence_extension(&self, extension: PresenceExtension) {
        self.mutate_presence(|own| {
            let name = extension.name().to_string();
            let before: Vec<_> = own.iter().filter(|e| e.name() == name).cloned().collect();
            if before.len() == 1 && before[0] == extension {
                return false;
            }
            own.retain(|e| e.name() != name);
            own.push(extension.clone());
            true
        });
    }

    /// Add the extension only when no extension with that name exists.
    pub fn add_presence_extension_if_missing(&self, extension: PresenceExtension) {
        self.mutate_presence(|own| {
            if own.iter().any(|e| e.name() == extension.name()) {
                false
            } else {
                own.push(extension.clone());
                true
            }
        });
    }

    /// Remove every extension with the given name.
    pub fn remove_presence_extensions(&self, name: &str) {
        self.mutate_presence(|own| {
            let before = own.len();
            own.retain(|e| e.name() != name);
            own.len() != before
        });
    }

    /// Add several extensions; at most one update is emitted.
    pub fn add_presence_extensions(&self, extensions: Vec<PresenceExtension>) {
        self.mutate_presence(|own| {
            let mut changed = false;
            for extension in &extensions {
                if !own.contains(extension) {
                    own.push(extension.clone());
                    changed = true;
                }
            }
            changed
        });
    }

    pub fn own_presence(&self) -> Vec<PresenceExtension> {
        self.state.lock().own_presence.clone()
    }

    fn mutate_presence<F>(&self, mutate: F)
    where
        F: Fn(&mut Vec<PresenceExtension>) -> bool,
    {
        let mut state = self.state.lock();
        if mutate(&mut state.own_presence) {
            self.presence_sender.send_presence(&state.own_presence);
        }
    }

    // ---- lifecycle ----

    /// Mark the room destroyed and drop all members.
    pub fn destroy(&self, reason: Option<String>) {
        {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.members.clear();
            state.audio_senders = 0;
            state.video_senders = 0;
        }
        self.emitter.emit(&ChatRoomEvent::RoomDestroyed { reason });
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}

impl std::fmt::Debug for ChatRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRoom").field("room_id", &self.room_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::presence::{MucAffiliation, MucRole, STATUS_KICKED};
    use pretty_assertions::assert_eq;

    fn room() -> ChatRoom {
        ChatRoom::new(
            RoomId::from("room@muc.example.com"),
            Arc::new(FocusConfig::default()),
            Arc::new(NullPresenceSender),
        )
    }

    fn occupant(n: &str) -> OccupantId {
        OccupantId::new(format!("room@muc.example.com/{}", n))
    }

    fn join(n: &str, role: MucRole) -> Presence {
        Presence::available(occupant(n), role, MucAffiliation::None)
    }

    fn unmuted_audio(n: &str) -> PresenceExtension {
        PresenceExtension::SourceInfo(format!(r#"{{"{}-a0": {{"muted": false}}}}"#, n))
    }

    #[test]
    fn test_join_and_leave_emit_events() {
        let room = room();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        room.subscribe("test", move |e| sink.lock().push(e.clone()));

        room.process_presence(&join("abcd1234", MucRole::Participant));
        room.process_presence(&Presence::unavailable(occupant("abcd1234")));

        assert_eq!(
            *events.lock(),
            vec![
                ChatRoomEvent::MemberJoined(occupant("abcd1234")),
                ChatRoomEvent::MemberLeft(occupant("abcd1234")),
            ]
        );
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_kick_emits_kicked() {
        let room = room();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        room.subscribe("test", move |e| sink.lock().push(e.clone()));

        room.process_presence(&join("abcd1234", MucRole::Participant));
        room.process_presence(
            &Presence::unavailable(occupant("abcd1234")).with_status_code(STATUS_KICKED),
        );

        assert!(events.lock().contains(&ChatRoomEvent::MemberKicked(occupant("abcd1234"))));
    }

    #[test]
    fn test_sender_counts_follow_source_info() {
        let room = room();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        room.subscribe("test", move |e| {
            if let ChatRoomEvent::AudioSendersCountChanged(n) = e {
                sink.lock().push(*n);
            }
        });

        room.process_presence(
            &join("abcd1234", MucRole::Participant).with_extension(unmuted_audio("a")),
        );
        assert_eq!(room.audio_senders_count(), 1);

        // Mute.
        room.process_presence(&join("abcd1234", MucRole::Participant).with_extension(
            PresenceExtension::SourceInfo(r#"{"a-a0": {"muted": true}}"#.to_string()),
        ));
        assert_eq!(room.audio_senders_count(), 0);

        room.process_presence(&Presence::unavailable(occupant("abcd1234")));
        assert_eq!(room.audio_senders_count(), 0);

        assert_eq!(*counts.lock(), vec![1, 0]);
    }

    #[test]
    fn test_sender_count_matches_member_contributions() {
        let room = room();
        for n in ["aaaa0001", "aaaa0002", "aaaa0003"] {
            room.process_presence(
                &join(n, MucRole::Participant).with_extension(unmuted_audio(n)),
            );
        }
        let contributed = room
            .members()
            .iter()
            .filter(|m| m.is_sender_of(MediaType::Audio))
            .count();
        assert_eq!(room.audio_senders_count(), contributed);
        assert_eq!(contributed, 3);
    }

    #[test]
    fn test_visitor_role_change_keeps_counts() {
        let room = room();
        room.process_presence(&join("abcd1234", MucRole::Visitor));
        assert_eq!(room.visitor_count(), 1);

        // Server now claims the member is a participant; refused.
        room.process_presence(&join("abcd1234", MucRole::Participant));
        assert_eq!(room.visitor_count(), 1);
        assert_eq!(
            room.member(&occupant("abcd1234")).unwrap().role,
            MemberRole::Visitor
        );
    }

    #[test]
    fn test_pending_visitor_window() {
        let room = room();
        room.record_visitor_invite();
        room.record_visitor_invite();
        assert_eq!(room.visitor_count(), 2);

        // One invite joins; its pending slot is consumed.
        room.process_presence(&join("abcd1234", MucRole::Visitor));
        assert_eq!(room.visitor_count(), 2);
    }

    #[test]
    fn test_invalid_occupant_discarded_in_strict_mode() {
        let room = room();
        room.process_presence(&join("Not Valid!", MucRole::Participant));
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_presence_builder_emits_single_update_per_change() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Default)]
        struct CountingSender(AtomicUsize);
        impl PresenceSender for CountingSender {
            fn send_presence(&self, _: &[PresenceExtension]) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sender = Arc::new(CountingSender::default());
        let room = ChatRoom::new(
            RoomId::from("r@muc"),
            Arc::new(FocusConfig::default()),
            sender.clone(),
        );

        let region = PresenceExtension::Region("eu".into());
        room.set_presence_extension(region.clone());
        // Unchanged: suppressed.
        room.set_presence_extension(region.clone());
        room.add_presence_extension_if_missing(region.clone());
        assert_eq!(sender.0.load(std::sync::atomic::Ordering::SeqCst), 1);

        room.set_presence_extension(PresenceExtension::Region("us".into()));
        room.remove_presence_extensions("region");
        room.remove_presence_extensions("region");
        assert_eq!(sender.0.load(std::sync::atomic::Ordering::SeqCst), 3);

        room.add_presence_extensions(vec![
            PresenceExtension::StatsId("s".into()),
            PresenceExtension::Region("eu".into()),
        ]);
        assert_eq!(sender.0.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn test_visitors_enabled_metadata_wins() {
        let room = room();
        let mut form = RoomConfigForm::default();
        form.visitors_enabled = Some(false);
        room.set_config_form(form);
        assert_eq!(room.visitors_enabled(), Some(false));

        let mut metadata = RoomMetadata::default();
        metadata.visitors_enabled = Some(true);
        room.apply_metadata(metadata);
        assert_eq!(room.visitors_enabled(), Some(true));
    }

    #[tokio::test]
    async fn test_await_metadata_times_out() {
        let room = room();
        assert!(!room.await_metadata(Duration::from_millis(20)).await);

        room.apply_metadata(RoomMetadata::default());
        assert!(room.await_metadata(Duration::from_millis(20)).await);
    }

    #[test]
    fn test_destroyed_room_ignores_presence() {
        let room = room();
        room.process_presence(&join("abcd1234", MucRole::Participant));
        room.destroy(Some("shutdown".into()));
        assert!(room.is_destroyed());
        assert_eq!(room.member_count(), 0);

        room.process_presence(&join("bbbb0001", MucRole::Participant));
        assert_eq!(room.member_count(), 0);
    }

    #[test]
    fn test_auto_owner_predicate() {
        let room = room();
        assert!(!room.has_owner());
        room.process_presence(&Presence::available(
            occupant("abcd1234"),
            MucRole::Moderator,
            MucAffiliation::Owner,
        ));
        assert!(room.has_owner());
    }
}
