//! The per-conference controller.
//!
//! Owns the participants, drives their signaling and reacts to
//! chat-room and bridge events. All state lives inside one task fed by
//! an ordered queue; chat-room listeners and bridge completions post
//! messages onto it, so every mutation is serialized per conference.

use std::sync::Arc;

use focus_common::{EventEmitter, RearmableTimer};
use indexmap::IndexMap;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::{BridgeEvent, BridgeId, BridgeRegistry, BridgeSelector};
use crate::colibri::{
    AllocationFailure, AllocationRequest, ColibriAllocation, ColibriSessionEvent,
    ColibriSessionManager, ColibriTransport, MeetingId, Transport,
};
use crate::config::FocusConfig;
use crate::errors::{FocusError, Result};
use crate::room::{
    ChatRoom, ChatRoomEvent, Feature, OccupantId, PresenceSender, RoomId, StartMutedPolicy,
};
use crate::source::{ConferenceSourceMap, EndpointId, EndpointSourceSet, ValidationError};

use super::events::ConferenceEvent;
use super::participant::{Participant, ParticipantState};
use super::signaling::{
    filter_sources_for, ConferenceOffer, SignalingMessage, SignalingSender,
};

/// Inbound signaling requests from participants.
#[derive(Debug, Clone)]
pub enum ConferenceRequest {
    SessionAccept { from: EndpointId, transport: Transport, sources: EndpointSourceSet },
    TransportInfo { from: EndpointId, transport: Transport },
    SourceAdd { from: EndpointId, sources: EndpointSourceSet },
    SourceRemove { from: EndpointId, sources: EndpointSourceSet },
    SessionTerminate { from: EndpointId, reason: Option<String> },
}

/// Introspection view of one conference.
#[derive(Debug, Clone, Serialize)]
pub struct ConferenceSnapshot {
    pub room: String,
    pub meeting_id: String,
    pub participants: Vec<ParticipantSnapshot>,
    pub bridges: Vec<crate::colibri::BridgeSessionSnapshot>,
    pub source_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub endpoint: String,
    pub state: String,
    pub region: Option<String>,
    pub visitor: bool,
}

enum ConferenceMessage {
    Room(ChatRoomEvent),
    Request { request: ConferenceRequest, reply: oneshot::Sender<Result<()>> },
    AllocationComplete {
        endpoint: EndpointId,
        result: std::result::Result<ColibriAllocation, AllocationFailure>,
    },
    SessionFailed { bridge: BridgeId, endpoints: Vec<EndpointId> },
    BridgeDown(BridgeId),
    ForceMute { endpoints: Vec<(EndpointId, Option<bool>, Option<bool>)> },
    FlushSources,
    StartTimeoutFired,
    SingleParticipantTimeoutFired,
    Snapshot { reply: oneshot::Sender<ConferenceSnapshot> },
    Destroy { reason: String },
}

/// Handle to one live conference.
pub struct FocusConference {
    room_id: RoomId,
    room: Arc<ChatRoom>,
    session_manager: Arc<ColibriSessionManager>,
    tx: mpsc::UnboundedSender<ConferenceMessage>,
    emitter: Arc<EventEmitter<ConferenceEvent>>,
    task: SyncMutex<Option<JoinHandle<()>>>,
}

impl FocusConference {
    /// Create the conference and start its task. The chat room is
    /// created alongside; presence is fed through [`Self::room`].
    pub fn new(
        room_id: RoomId,
        config: Arc<FocusConfig>,
        registry: Arc<BridgeRegistry>,
        selector: Arc<BridgeSelector>,
        transport: Arc<dyn ColibriTransport>,
        signaling: Arc<dyn SignalingSender>,
        presence_sender: Arc<dyn PresenceSender>,
        meeting_id: Option<MeetingId>,
    ) -> Arc<Self> {
        let meeting_id = meeting_id.unwrap_or_else(MeetingId::generate);
        let room = Arc::new(ChatRoom::new(room_id.clone(), config.clone(), presence_sender));
        let session_manager = Arc::new(ColibriSessionManager::new(
            config.clone(),
            registry.clone(),
            selector,
            transport,
            meeting_id,
        ));
        let emitter = Arc::new(EventEmitter::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let listener_name = format!("conference-{}", room_id);
        {
            let tx = tx.clone();
            room.subscribe(&listener_name, move |event| {
                let _ = tx.send(ConferenceMessage::Room(event.clone()));
            });
        }
        {
            let tx = tx.clone();
            session_manager.subscribe(&listener_name, move |event| {
                let ColibriSessionEvent::SessionFailed { bridge, endpoints } = event;
                let _ = tx.send(ConferenceMessage::SessionFailed {
                    bridge: bridge.clone(),
                    endpoints: endpoints.clone(),
                });
            });
        }
        {
            let tx = tx.clone();
            registry.subscribe(&listener_name, move |event| {
                if let BridgeEvent::Failed(bridge) = event {
                    let _ = tx.send(ConferenceMessage::BridgeDown(bridge.clone()));
                }
            });
        }

        let max_sources = config.conference.max_ssrcs_per_user;
        let task = ConferenceTask {
            config,
            room: room.clone(),
            registry,
            session_manager: session_manager.clone(),
            signaling,
            emitter: emitter.clone(),
            tx: tx.clone(),
            listener_name,
            participants: IndexMap::new(),
            sources: ConferenceSourceMap::with_limit(max_sources),
            pending_adds: Vec::new(),
            pending_removes: Vec::new(),
            flush_armed: false,
            start_timer: RearmableTimer::new(),
            single_timer: RearmableTimer::new(),
            started: false,
            destroyed: false,
        };
        let worker = tokio::spawn(task.run(rx));

        Arc::new(Self {
            room_id,
            room,
            session_manager,
            tx,
            emitter,
            task: SyncMutex::new(Some(worker)),
        })
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The chat room this conference coordinates. Presence is fed here.
    pub fn room(&self) -> &Arc<ChatRoom> {
        &self.room
    }

    pub fn meeting_id(&self) -> &MeetingId {
        self.session_manager.meeting_id()
    }

    pub fn subscribe<F>(&self, name: &str, listener: F)
    where
        F: Fn(&ConferenceEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(name, listener);
    }

    /// Handle one inbound signaling request. The result is the
    /// ack/nack sent back to the participant.
    pub async fn handle_request(&self, request: ConferenceRequest) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ConferenceMessage::Request { request, reply: reply_tx })
            .map_err(|_| FocusError::Disposed)?;
        reply_rx.await.map_err(|_| FocusError::Disposed)?
    }

    /// Force-mute endpoints (moderator action); coalesced per bridge
    /// session downstream.
    pub fn force_mute(
        &self,
        endpoints: Vec<(EndpointId, Option<bool>, Option<bool>)>,
    ) -> Result<()> {
        self.tx
            .send(ConferenceMessage::ForceMute { endpoints })
            .map_err(|_| FocusError::Disposed)
    }

    pub async fn snapshot(&self) -> Result<ConferenceSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ConferenceMessage::Snapshot { reply: reply_tx })
            .map_err(|_| FocusError::Disposed)?;
        reply_rx.await.map_err(|_| FocusError::Disposed)
    }

    /// Tear the conference down.
    pub fn destroy(&self, reason: impl Into<String>) {
        let _ = self.tx.send(ConferenceMessage::Destroy { reason: reason.into() });
    }
}

impl Drop for FocusConference {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for FocusConference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusConference").field("room_id", &self.room_id).finish()
    }
}

/// The single-writer task owning all conference state.
struct ConferenceTask {
    config: Arc<FocusConfig>,
    room: Arc<ChatRoom>,
    registry: Arc<BridgeRegistry>,
    session_manager: Arc<ColibriSessionManager>,
    signaling: Arc<dyn SignalingSender>,
    emitter: Arc<EventEmitter<ConferenceEvent>>,
    tx: mpsc::UnboundedSender<ConferenceMessage>,
    listener_name: String,
    participants: IndexMap<EndpointId, Participant>,
    sources: ConferenceSourceMap,
    pending_adds: Vec<(EndpointId, EndpointSourceSet)>,
    pending_removes: Vec<(EndpointId, EndpointSourceSet)>,
    flush_armed: bool,
    start_timer: RearmableTimer,
    single_timer: RearmableTimer,
    /// Whether any participant ever reached Established.
    started: bool,
    destroyed: bool,
}

impl ConferenceTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ConferenceMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                ConferenceMessage::Room(event) => self.on_room_event(event).await,
                ConferenceMessage::Request { request, reply } => {
                    let result = self.on_request(request).await;
                    let _ = reply.send(result);
                }
                ConferenceMessage::AllocationComplete { endpoint, result } => {
                    self.on_allocation_complete(endpoint, result).await;
                }
                ConferenceMessage::SessionFailed { bridge, endpoints } => {
                    self.on_session_failed(bridge, endpoints);
                }
                ConferenceMessage::BridgeDown(bridge) => {
                    let affected = self.session_manager.bridges_down(&[bridge.clone()]).await;
                    self.on_session_failed(bridge, affected);
                }
                ConferenceMessage::ForceMute { endpoints } => {
                    let manager = self.session_manager.clone();
                    tokio::spawn(async move {
                        manager.set_force_mute(endpoints).await;
                    });
                }
                ConferenceMessage::FlushSources => self.flush_source_signaling(),
                ConferenceMessage::StartTimeoutFired => {
                    if !self.started && !self.destroyed {
                        tracing::warn!(
                            "No participant established in {} before the start timeout",
                            self.room.room_id()
                        );
                        self.destroy("conference start timeout".into()).await;
                    }
                }
                ConferenceMessage::SingleParticipantTimeoutFired => {
                    if self.lone_active_participant_count() == 1 && !self.destroyed {
                        self.destroy("single participant timeout".into()).await;
                    }
                }
                ConferenceMessage::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot().await);
                }
                ConferenceMessage::Destroy { reason } => {
                    self.destroy(reason).await;
                    break;
                }
            }
            if self.destroyed {
                break;
            }
        }
        tracing::debug!("Conference task for {} exited", self.room.room_id());
    }

    // ---- room events ----

    async fn on_room_event(&mut self, event: ChatRoomEvent) {
        match event {
            ChatRoomEvent::MemberJoined(occupant) => self.on_member_joined(occupant),
            ChatRoomEvent::MemberLeft(occupant) | ChatRoomEvent::MemberKicked(occupant) => {
                let endpoint = occupant.endpoint_id();
                self.terminate_participant(&endpoint, "member left", false);
                self.maybe_stop_after_leave().await;
            }
            ChatRoomEvent::RoleChanged { occupant, role } => {
                let endpoint = occupant.endpoint_id();
                if let Some(participant) = self.participants.get_mut(&endpoint) {
                    participant.role = role;
                }
            }
            ChatRoomEvent::SourceInfoChanged(_)
            | ChatRoomEvent::AudioSendersCountChanged(_)
            | ChatRoomEvent::VideoSendersCountChanged(_) => {
                self.update_single_participant_timer();
            }
            ChatRoomEvent::RoomDestroyed { reason } => {
                self.destroy(reason.unwrap_or_else(|| "room destroyed".into())).await;
            }
            ChatRoomEvent::ConfigReloaded => {
                // With presets enabled the join blocks for a bounded
                // time on the room-metadata message; proceed with
                // defaults on timeout.
                if self.room.config_form().presets_enabled {
                    let room = self.room.clone();
                    tokio::spawn(async move {
                        room.await_metadata(std::time::Duration::from_secs(10)).await;
                    });
                }
            }
            ChatRoomEvent::MetadataUpdated(_) => {}
        }
    }

    fn on_member_joined(&mut self, occupant: OccupantId) {
        let Some(member) = self.room.member(&occupant) else {
            return;
        };
        let endpoint = member.endpoint_id.clone();
        if self.participants.contains_key(&endpoint) {
            tracing::warn!("Duplicate join for {}", endpoint);
            return;
        }

        if self.participants.is_empty() && !self.started {
            let tx = self.tx.clone();
            self.start_timer.arm(self.config.conference.start_timeout(), move || {
                let _ = tx.send(ConferenceMessage::StartTimeoutFired);
            });
        }

        if self.config.conference.enable_auto_owner
            && !member.role.is_visitor()
            && !member.is_robot
            && !member.is_service_robot()
            && !self.room.has_owner()
        {
            let signaling = self.signaling.clone();
            let occupant = occupant.clone();
            tokio::spawn(async move {
                signaling.grant_owner(occupant).await;
            });
        }

        let mut participant = Participant::from_member(&member);
        if participant.set_state(ParticipantState::Allocating).is_err() {
            return;
        }
        self.participants.insert(endpoint.clone(), participant);
        self.spawn_allocation(&endpoint);
    }

    /// The conference ends when the last non-visitor member is gone.
    async fn maybe_stop_after_leave(&mut self) {
        let non_visitors =
            self.room.members().iter().filter(|m| !m.role.is_visitor()).count();
        if non_visitors == 0 && !self.destroyed {
            self.destroy("last participant left".into()).await;
        } else {
            self.update_single_participant_timer();
        }
    }

    // ---- allocation ----

    fn spawn_allocation(&mut self, endpoint: &EndpointId) {
        let Some(participant) = self.participants.get(endpoint) else {
            return;
        };
        let request = AllocationRequest {
            endpoint_id: endpoint.clone(),
            region: participant.region.clone(),
            visitor: participant.is_visitor(),
            sources: self.sources.snapshot_endpoint(endpoint),
            use_sctp: participant.supports(Feature::Sctp),
        };
        let manager = self.session_manager.clone();
        let tx = self.tx.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            let result = manager.allocate(request).await;
            let _ = tx.send(ConferenceMessage::AllocationComplete { endpoint, result });
        });
    }

    async fn on_allocation_complete(
        &mut self,
        endpoint: EndpointId,
        result: std::result::Result<ColibriAllocation, AllocationFailure>,
    ) {
        let Some(participant) = self.participants.get_mut(&endpoint) else {
            // Left while allocating; free the bridge resources.
            if result.is_ok() {
                let manager = self.session_manager.clone();
                tokio::spawn(async move {
                    manager.expire_participant(&endpoint).await;
                });
            }
            return;
        };
        if participant.is_terminated() {
            if result.is_ok() && !participant.expired {
                participant.expired = true;
                let manager = self.session_manager.clone();
                tokio::spawn(async move {
                    manager.expire_participant(&endpoint).await;
                });
            }
            return;
        }

        match result {
            Ok(allocation) => {
                participant.allocation = Some(allocation.clone());
                participant.reinvite_attempts = 0;
                if participant.set_state(ParticipantState::Invited).is_err() {
                    return;
                }

                let offer = self.build_offer(&endpoint, &allocation);
                let signaling = self.signaling.clone();
                let occupant = self.participants[&endpoint].occupant.clone();
                tokio::spawn(async move {
                    signaling.send(occupant, SignalingMessage::SessionInitiate(offer)).await;
                });
                self.emitter.emit(&ConferenceEvent::ParticipantInvited(endpoint));
            }
            Err(AllocationFailure::Disposed) => {}
            Err(
                failure @ (AllocationFailure::BridgeSelectionFailed
                | AllocationFailure::BadRequest { .. }),
            ) => {
                tracing::error!("Allocation for {} failed permanently: {}", endpoint, failure);
                self.terminate_participant(&endpoint, "allocation failed", true);
            }
            Err(failure) => {
                // Bridge failed or forgot us; try again on another one.
                tracing::warn!("Allocation for {} failed: {}, re-inviting", endpoint, failure);
                self.reinvite(&endpoint);
            }
        }
    }

    fn build_offer(
        &self,
        endpoint: &EndpointId,
        allocation: &ColibriAllocation,
    ) -> ConferenceOffer {
        let participant = &self.participants[endpoint];
        let strip = self.config.conference.strip_simulcast;
        let conference_sources: Vec<(EndpointId, EndpointSourceSet)> = self
            .sources
            .endpoints()
            .filter(|(owner, _)| *owner != endpoint)
            .map(|(owner, set)| {
                (owner.clone(), filter_sources_for(&participant.features, set, strip))
            })
            .filter(|(_, set)| !set.is_empty())
            .collect();

        let start_muted = self
            .room
            .metadata()
            .and_then(|m| m.start_muted)
            .unwrap_or(StartMutedPolicy::default());

        ConferenceOffer {
            transport: allocation.transport.clone(),
            feedback_sources: allocation.feedback_sources.clone(),
            conference_sources,
            sctp_port: allocation.sctp_port,
            bridge_region: allocation.region.clone(),
            start_muted,
        }
    }

    fn reinvite(&mut self, endpoint: &EndpointId) {
        let Some(participant) = self.participants.get_mut(endpoint) else {
            return;
        };
        if participant.is_terminated() {
            return;
        }
        participant.reinvite_attempts += 1;
        if participant.reinvite_attempts > 3 {
            tracing::error!("Giving up on {} after repeated re-invites", endpoint);
            self.terminate_participant(endpoint, "re-invite limit reached", true);
            return;
        }
        if participant.set_state(ParticipantState::Reinviting).is_err()
            || participant.set_state(ParticipantState::Allocating).is_err()
        {
            return;
        }
        participant.allocation = None;
        self.spawn_allocation(endpoint);
    }

    fn on_session_failed(&mut self, bridge: BridgeId, endpoints: Vec<EndpointId>) {
        if self.destroyed || endpoints.is_empty() {
            return;
        }
        tracing::warn!(
            "Bridge session on {} failed, re-inviting {} endpoints",
            bridge,
            endpoints.len()
        );
        self.emitter.emit(&ConferenceEvent::BridgeSessionFailed {
            bridge,
            endpoints: endpoints.clone(),
        });
        for endpoint in endpoints {
            self.reinvite(&endpoint);
        }
    }

    // ---- inbound requests ----

    async fn on_request(&mut self, request: ConferenceRequest) -> Result<()> {
        match request {
            ConferenceRequest::SessionAccept { from, transport, sources } => {
                self.on_session_accept(from, transport, sources)
            }
            ConferenceRequest::TransportInfo { from, transport } => {
                let participant = self
                    .participants
                    .get_mut(&from)
                    .ok_or_else(|| FocusError::participant_not_found(&from))?;
                participant.merge_transport(&transport);
                let merged = participant.transport.clone();
                let manager = self.session_manager.clone();
                tokio::spawn(async move {
                    manager.update_transport(&from, merged).await;
                });
                Ok(())
            }
            ConferenceRequest::SourceAdd { from, sources } => self.on_source_add(from, sources),
            ConferenceRequest::SourceRemove { from, sources } => {
                self.on_source_remove(from, sources)
            }
            ConferenceRequest::SessionTerminate { from, reason } => {
                tracing::info!(
                    "Session terminate from {}: {}",
                    from,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.terminate_participant(&from, "terminated by peer", false);
                Ok(())
            }
        }
    }

    fn on_session_accept(
        &mut self,
        from: EndpointId,
        transport: Transport,
        sources: EndpointSourceSet,
    ) -> Result<()> {
        let participant = self
            .participants
            .get(&from)
            .ok_or_else(|| FocusError::participant_not_found(&from))?;
        if participant.state() != ParticipantState::Invited {
            return Err(FocusError::invalid_state(format!(
                "session-accept in {:?}",
                participant.state()
            )));
        }
        let visitor = participant.is_visitor();

        // Validate before committing anything: a nack must leave both
        // the source map and the state machine untouched.
        let accepted = if sources.is_empty() {
            EndpointSourceSet::new()
        } else if visitor {
            return Err(ValidationError::VisitorCodecChange.into());
        } else {
            self.sources.try_add(&from, sources)?
        };

        let participant = self.participants.get_mut(&from).expect("present above");
        participant.set_state(ParticipantState::Established)?;
        participant.merge_transport(&transport);
        let merged = participant.transport.clone();

        {
            let manager = self.session_manager.clone();
            let endpoint = from.clone();
            let full_set = self.sources.snapshot_endpoint(&from);
            tokio::spawn(async move {
                manager.update_transport(&endpoint, merged).await;
                if !full_set.is_empty() {
                    manager.update_sources(&endpoint, full_set).await;
                }
            });
        }

        if !self.started {
            self.started = true;
            self.start_timer.cancel();
        }
        if !accepted.is_empty() {
            self.queue_source_add(from.clone(), accepted);
        }
        self.emitter.emit(&ConferenceEvent::ParticipantEstablished(from));
        self.update_single_participant_timer();
        Ok(())
    }

    fn on_source_add(&mut self, from: EndpointId, sources: EndpointSourceSet) -> Result<()> {
        let participant = self
            .participants
            .get(&from)
            .ok_or_else(|| FocusError::participant_not_found(&from))?;
        if !participant.is_established() {
            return Err(FocusError::invalid_state("source-add before session-accept"));
        }
        if participant.is_visitor() {
            return Err(ValidationError::VisitorCodecChange.into());
        }

        let accepted = self.sources.try_add(&from, sources)?;
        if accepted.is_empty() {
            return Ok(());
        }

        let manager = self.session_manager.clone();
        let endpoint = from.clone();
        let full_set = self.sources.snapshot_endpoint(&from);
        tokio::spawn(async move {
            manager.update_sources(&endpoint, full_set).await;
        });

        self.queue_source_add(from, accepted);
        Ok(())
    }

    fn on_source_remove(&mut self, from: EndpointId, sources: EndpointSourceSet) -> Result<()> {
        let participant = self
            .participants
            .get(&from)
            .ok_or_else(|| FocusError::participant_not_found(&from))?;
        if !participant.is_established() {
            return Err(FocusError::invalid_state("source-remove before session-accept"));
        }

        let removed = self.sources.try_remove(&from, &sources)?;
        if removed.is_empty() {
            return Ok(());
        }

        let manager = self.session_manager.clone();
        let endpoint = from.clone();
        let full_set = self.sources.snapshot_endpoint(&from);
        tokio::spawn(async move {
            manager.update_sources(&endpoint, full_set).await;
        });

        self.queue_source_remove(from, removed);
        Ok(())
    }

    // ---- source signaling ----

    fn queue_source_add(&mut self, owner: EndpointId, set: EndpointSourceSet) {
        self.pending_adds.push((owner, set));
        self.arm_flush();
    }

    fn queue_source_remove(&mut self, owner: EndpointId, set: EndpointSourceSet) {
        self.pending_removes.push((owner, set));
        self.arm_flush();
    }

    /// Bursts of source changes are coalesced for a delay that grows
    /// with conference size.
    fn arm_flush(&mut self) {
        if self.flush_armed {
            return;
        }
        self.flush_armed = true;
        let delay = self.config.conference.source_signaling_delay(self.participants.len());
        let tx = self.tx.clone();
        if delay.is_zero() {
            let _ = tx.send(ConferenceMessage::FlushSources);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(ConferenceMessage::FlushSources);
            });
        }
    }

    fn flush_source_signaling(&mut self) {
        self.flush_armed = false;
        let adds = std::mem::take(&mut self.pending_adds);
        let removes = std::mem::take(&mut self.pending_removes);
        if adds.is_empty() && removes.is_empty() {
            return;
        }
        let strip = self.config.conference.strip_simulcast;

        for (endpoint, participant) in &self.participants {
            if !participant.is_established() {
                continue;
            }
            let filter = |entries: &[(EndpointId, EndpointSourceSet)]| {
                entries
                    .iter()
                    .filter(|(owner, _)| owner != endpoint)
                    .map(|(owner, set)| {
                        (owner.clone(), filter_sources_for(&participant.features, set, strip))
                    })
                    .filter(|(_, set)| !set.is_empty())
                    .collect::<Vec<_>>()
            };

            let to_add = filter(&adds);
            let to_remove = filter(&removes);
            let occupant = participant.occupant.clone();
            let signaling = self.signaling.clone();
            if !to_add.is_empty() || !to_remove.is_empty() {
                tokio::spawn(async move {
                    if !to_add.is_empty() {
                        signaling
                            .send(occupant.clone(), SignalingMessage::SourceAdd(to_add))
                            .await;
                    }
                    if !to_remove.is_empty() {
                        signaling.send(occupant, SignalingMessage::SourceRemove(to_remove)).await;
                    }
                });
            }
        }
    }

    // ---- termination / lifecycle ----

    fn terminate_participant(&mut self, endpoint: &EndpointId, reason: &str, signal: bool) {
        let Some(participant) = self.participants.get_mut(endpoint) else {
            return;
        };
        if participant.is_terminated() {
            return;
        }
        let _ = participant.set_state(ParticipantState::Terminated);
        tracing::info!("Participant {} terminated: {}", endpoint, reason);

        if !participant.expired {
            participant.expired = true;
            let manager = self.session_manager.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                manager.expire_participant(&endpoint).await;
            });
        }
        if signal {
            let signaling = self.signaling.clone();
            let occupant = participant.occupant.clone();
            let reason = reason.to_string();
            tokio::spawn(async move {
                signaling.send(occupant, SignalingMessage::SessionTerminate { reason }).await;
            });
        }

        if let Some(removed) = self.sources.remove_endpoint(endpoint) {
            if !removed.is_empty() {
                self.queue_source_remove(endpoint.clone(), removed);
            }
        }
        self.emitter.emit(&ConferenceEvent::ParticipantTerminated(endpoint.clone()));
        self.update_single_participant_timer();
    }

    /// Established, non-visitor participants with at least one unmuted
    /// source.
    fn lone_active_participant_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.is_established() && !p.is_visitor())
            .filter(|p| {
                self.room
                    .member(&p.occupant)
                    .map(|m| {
                        m.is_sender_of(crate::source::MediaType::Audio)
                            || m.is_sender_of(crate::source::MediaType::Video)
                    })
                    .unwrap_or(false)
            })
            .count()
    }

    fn update_single_participant_timer(&mut self) {
        if self.destroyed {
            return;
        }
        let lone = self.lone_active_participant_count() == 1;
        if lone && !self.single_timer.is_armed() {
            let tx = self.tx.clone();
            self.single_timer.arm(
                self.config.conference.single_participant_timeout(),
                move || {
                    let _ = tx.send(ConferenceMessage::SingleParticipantTimeoutFired);
                },
            );
        } else if !lone {
            self.single_timer.cancel();
        }
    }

    async fn destroy(&mut self, reason: String) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        tracing::info!("Destroying conference {}: {}", self.room.room_id(), reason);

        self.start_timer.cancel();
        self.single_timer.cancel();

        let endpoints: Vec<EndpointId> = self.participants.keys().cloned().collect();
        for endpoint in endpoints {
            self.terminate_participant(&endpoint, &reason, true);
        }

        let manager = self.session_manager.clone();
        tokio::spawn(async move {
            manager.dispose().await;
        });
        self.registry.unsubscribe(&self.listener_name);
        self.room.destroy(Some(reason.clone()));
        self.emitter.emit(&ConferenceEvent::ConferenceEnded {
            room: self.room.room_id().clone(),
            reason,
        });
    }

    async fn snapshot(&self) -> ConferenceSnapshot {
        ConferenceSnapshot {
            room: self.room.room_id().to_string(),
            meeting_id: self.session_manager.meeting_id().to_string(),
            participants: self
                .participants
                .values()
                .map(|p| ParticipantSnapshot {
                    endpoint: p.endpoint_id.to_string(),
                    state: format!("{:?}", p.state()),
                    region: p.region.clone(),
                    visitor: p.is_visitor(),
                })
                .collect(),
            bridges: self.session_manager.session_snapshots().await,
            source_count: self.sources.total_source_count(),
        }
    }
}
