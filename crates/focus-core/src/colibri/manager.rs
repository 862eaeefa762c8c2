//! Colibri session manager.
//!
//! Maintains one [`BridgeSession`] per (conference, bridge), issues
//! allocate / update / expire directives and reconciles the cascade
//! across sessions. Requests are serialized per session; updates with a
//! timed-out reply are dropped silently while explicit error responses
//! are fatal to the session.

use std::sync::Arc;

use focus_common::EventEmitter;
use indexmap::IndexMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::bridge::{BridgeId, BridgeRegistry, BridgeSelector, ParticipantProperties};
use crate::config::FocusConfig;
use crate::source::{EndpointId, EndpointSourceSet};

use super::cascade::{Cascade, DEFAULT_MESH};
use super::error::AllocationFailure;
use super::relay::{rewrite_fingerprints, strip_websockets_if_passive, Relay, RelayState};
use super::session::{BridgeSession, BridgeSessionSnapshot};
use super::types::{
    ColibriErrorReason, ColibriRequest, ColibriResponse, ColibriTransport, EndpointDirective,
    MeetingId, RelayDirective, Transport, TransportError,
};
use super::types::DirectiveOp;

/// What the conference asks for when allocating an endpoint.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub endpoint_id: EndpointId,
    pub region: Option<String>,
    pub visitor: bool,
    pub sources: EndpointSourceSet,
    pub use_sctp: bool,
}

/// A successful endpoint allocation.
#[derive(Debug, Clone)]
pub struct ColibriAllocation {
    pub bridge: BridgeId,
    pub session_id: String,
    pub region: Option<String>,
    pub feedback_sources: EndpointSourceSet,
    pub transport: Transport,
    pub sctp_port: Option<u16>,
}

/// Session-level events surfaced to the conference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColibriSessionEvent {
    /// The session is gone; the listed endpoints need a re-invite.
    SessionFailed { bridge: BridgeId, endpoints: Vec<EndpointId> },
}

struct SessionHandle {
    info: SyncMutex<BridgeSession>,
    /// Serializes requests per session.
    request_gate: AsyncMutex<()>,
}

impl SessionHandle {
    fn new(session: BridgeSession) -> Arc<Self> {
        Arc::new(Self { info: SyncMutex::new(session), request_gate: AsyncMutex::new(()) })
    }

    fn bridge_id(&self) -> BridgeId {
        self.info.lock().bridge.id.clone()
    }
}

struct ManagerState {
    sessions: IndexMap<BridgeId, Arc<SessionHandle>>,
    cascade: Cascade,
    disposed: bool,
}

/// Drives the bridge side of one conference.
pub struct ColibriSessionManager {
    config: Arc<FocusConfig>,
    registry: Arc<BridgeRegistry>,
    selector: Arc<BridgeSelector>,
    transport: Arc<dyn ColibriTransport>,
    meeting_id: MeetingId,
    /// Templated transcriber connect URL; `{meetingId}` is substituted.
    transcriber_url_template: Option<String>,
    recording_url: SyncMutex<Option<String>>,
    state: AsyncMutex<ManagerState>,
    emitter: EventEmitter<ColibriSessionEvent>,
}

impl ColibriSessionManager {
    pub fn new(
        config: Arc<FocusConfig>,
        registry: Arc<BridgeRegistry>,
        selector: Arc<BridgeSelector>,
        transport: Arc<dyn ColibriTransport>,
        meeting_id: MeetingId,
    ) -> Self {
        Self {
            config,
            registry,
            selector,
            transport,
            meeting_id,
            transcriber_url_template: None,
            recording_url: SyncMutex::new(None),
            state: AsyncMutex::new(ManagerState {
                sessions: IndexMap::new(),
                cascade: Cascade::new(),
                disposed: false,
            }),
            emitter: EventEmitter::new(),
        }
    }

    pub fn with_transcriber_url_template(mut self, template: impl Into<String>) -> Self {
        self.transcriber_url_template = Some(template.into());
        self
    }

    pub fn meeting_id(&self) -> &MeetingId {
        &self.meeting_id
    }

    pub fn subscribe<F>(&self, name: &str, listener: F)
    where
        F: Fn(&ColibriSessionEvent) + Send + Sync + 'static,
    {
        self.emitter.subscribe(name, listener);
    }

    /// Set the recording connect URL placed on subsequent create
    /// requests.
    pub fn set_recording_url(&self, url: Option<String>) {
        *self.recording_url.lock() = url;
    }

    // ---- allocation ----

    /// Allocate bridge resources for one endpoint.
    pub async fn allocate(
        &self,
        request: AllocationRequest,
    ) -> Result<ColibriAllocation, AllocationFailure> {
        let handle = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return Err(AllocationFailure::Disposed);
            }

            let conference_bridges: Vec<(BridgeId, usize)> = state
                .sessions
                .iter()
                .map(|(id, h)| (id.clone(), h.info.lock().participant_count()))
                .collect();
            let candidates = self.registry.selectable();
            let properties = ParticipantProperties {
                region: request.region.clone(),
                visitor: request.visitor,
            };
            let Some(bridge) =
                self.selector.select(&candidates, &conference_bridges, &properties).await
            else {
                return Err(AllocationFailure::BridgeSelectionFailed);
            };

            match state.sessions.get(&bridge.id) {
                Some(handle) => handle.clone(),
                None => {
                    tracing::info!(
                        "Creating bridge session on {} for meeting {}",
                        bridge.id,
                        self.meeting_id
                    );
                    let handle = SessionHandle::new(BridgeSession::new(bridge.clone()));
                    state.sessions.insert(bridge.id.clone(), handle.clone());
                    state.cascade.add_bridge(DEFAULT_MESH, bridge.id.clone());
                    handle
                }
            }
        };

        let allocation = self.allocate_on_session(&handle, &request).await?;

        // Cascade convergence: create any missing relay pairs for this
        // bridge and refresh its remote-endpoint advertisements.
        self.reconcile_relays(&allocation.bridge).await;

        Ok(allocation)
    }

    /// Drive the cascade around `bridge_id` to convergence: every mesh
    /// peer pair gets its relay pair, the earlier session initiating.
    async fn reconcile_relays(&self, bridge_id: &BridgeId) {
        let (peers, order) = {
            let state = self.state.lock().await;
            (
                state.cascade.peers_of(bridge_id),
                state.sessions.keys().cloned().collect::<Vec<BridgeId>>(),
            )
        };

        for peer in peers {
            let missing = {
                let state = self.state.lock().await;
                let own = state.sessions.get(bridge_id);
                let theirs = state.sessions.get(&peer);
                match (own, theirs) {
                    (Some(own), Some(theirs)) => {
                        !own.info.lock().relays.contains_key(&peer)
                            || !theirs.info.lock().relays.contains_key(bridge_id)
                    }
                    _ => false,
                }
            };
            if missing {
                let bridge_pos = order.iter().position(|b| b == bridge_id);
                let peer_pos = order.iter().position(|b| b == &peer);
                if peer_pos < bridge_pos {
                    self.create_relay_pair(&peer, bridge_id).await;
                } else {
                    self.create_relay_pair(bridge_id, &peer).await;
                }
            }
        }

        self.advertise_remote_endpoints(bridge_id).await;
    }

    async fn allocate_on_session(
        &self,
        handle: &Arc<SessionHandle>,
        request: &AllocationRequest,
    ) -> Result<ColibriAllocation, AllocationFailure> {
        let _gate = handle.request_gate.lock().await;

        let (bridge_id, colibri_request) = {
            let info = handle.info.lock();
            let mut colibri_request =
                ColibriRequest::new(info.bridge.id.clone(), self.meeting_id.clone());
            colibri_request.create = !info.created;
            if colibri_request.create {
                colibri_request.transcriber_url = self
                    .transcriber_url_template
                    .as_ref()
                    .map(|t| t.replace("{meetingId}", self.meeting_id.as_str()));
                colibri_request.recording_url = self.recording_url.lock().clone();
            }

            let mut directive = EndpointDirective::create(request.endpoint_id.clone());
            directive.sources =
                Some(request.sources.clone()).filter(|sources| !sources.is_empty());
            directive.sctp = request.use_sctp;
            colibri_request.endpoints.push(directive);
            (info.bridge.id.clone(), colibri_request)
        };

        match self.send_raw(colibri_request).await {
            Err(TransportError::Timeout) => {
                // Not a bridge failure by itself; the request is dropped
                // and the caller decides whether to retry elsewhere.
                tracing::warn!("Allocation request to {} timed out", bridge_id);
                Err(AllocationFailure::BridgeFailed { bridge: bridge_id, restart: false })
            }
            Err(TransportError::Connection(reason)) => {
                tracing::error!("Bridge {} unreachable: {}", bridge_id, reason);
                self.registry.mark_failed(&bridge_id);
                self.discard_session(&bridge_id).await;
                Err(AllocationFailure::BridgeFailed { bridge: bridge_id, restart: true })
            }
            Ok(ColibriResponse::Error { reason, message }) => match reason {
                ColibriErrorReason::BadRequest => {
                    tracing::error!("Bridge {} rejected allocation: {}", bridge_id, message);
                    Err(AllocationFailure::BadRequest { message })
                }
                ColibriErrorReason::ConferenceNotFound | ColibriErrorReason::UnknownEndpoint => {
                    tracing::warn!(
                        "Bridge {} expired conference {} ({}), discarding session",
                        bridge_id,
                        self.meeting_id,
                        reason
                    );
                    self.discard_session(&bridge_id).await;
                    Err(AllocationFailure::ColibriExpired { bridge: bridge_id, restart: true })
                }
                _ => {
                    tracing::error!("Bridge {} failed allocation: {}", bridge_id, message);
                    self.registry.mark_failed(&bridge_id);
                    self.discard_session(&bridge_id).await;
                    Err(AllocationFailure::BridgeFailed { bridge: bridge_id, restart: true })
                }
            },
            Ok(ColibriResponse::ConferenceModified { feedback_sources, endpoints, .. }) => {
                let endpoint = endpoints.iter().find(|e| e.id == request.endpoint_id);
                let Some(endpoint) = endpoint else {
                    tracing::error!(
                        "Bridge {} response misses endpoint {}",
                        bridge_id,
                        request.endpoint_id
                    );
                    self.registry.mark_failed(&bridge_id);
                    self.discard_session(&bridge_id).await;
                    return Err(AllocationFailure::BridgeFailed {
                        bridge: bridge_id,
                        restart: true,
                    });
                };
                let Some(transport) = endpoint.transport.clone() else {
                    tracing::error!(
                        "Bridge {} returned endpoint {} without transport",
                        bridge_id,
                        request.endpoint_id
                    );
                    self.registry.mark_failed(&bridge_id);
                    self.discard_session(&bridge_id).await;
                    return Err(AllocationFailure::BridgeFailed {
                        bridge: bridge_id,
                        restart: true,
                    });
                };

                let mut info = handle.info.lock();
                info.created = true;
                info.participants.insert(request.endpoint_id.clone(), request.sources.clone());
                if !feedback_sources.is_empty() {
                    info.feedback_sources = feedback_sources;
                }
                Ok(ColibriAllocation {
                    bridge: bridge_id,
                    session_id: info.id.clone(),
                    region: info.bridge.region.clone(),
                    feedback_sources: info.feedback_sources.clone(),
                    transport,
                    sctp_port: endpoint.sctp_port,
                })
            }
        }
    }

    // ---- updates ----

    /// Push an updated source set for an endpoint to its bridge and
    /// re-advertise it over relays.
    pub async fn update_sources(&self, endpoint: &EndpointId, sources: EndpointSourceSet) {
        let Some(handle) = self.session_of(endpoint).await else {
            return;
        };
        let bridge_id = {
            let mut info = handle.info.lock();
            info.participants.insert(endpoint.clone(), sources.clone());
            info.bridge.id.clone()
        };

        let mut request = ColibriRequest::new(bridge_id.clone(), self.meeting_id.clone());
        let mut directive = EndpointDirective::modify(endpoint.clone());
        directive.sources = Some(sources);
        request.endpoints.push(directive);
        self.send_update(&handle, request).await;

        self.advertise_remote_endpoints(&bridge_id).await;
    }

    /// Merge and push a transport update from the participant.
    pub async fn update_transport(&self, endpoint: &EndpointId, transport: Transport) {
        let Some(handle) = self.session_of(endpoint).await else {
            return;
        };
        let bridge_id = handle.bridge_id();
        let mut request = ColibriRequest::new(bridge_id, self.meeting_id.clone());
        let mut directive = EndpointDirective::modify(endpoint.clone());
        directive.transport = Some(transport);
        request.endpoints.push(directive);
        self.send_update(&handle, request).await;
    }

    /// Apply force-mute to a set of endpoints, coalesced into one
    /// request per session.
    pub async fn set_force_mute(
        &self,
        endpoints: Vec<(EndpointId, Option<bool>, Option<bool>)>,
    ) {
        let mut by_session: IndexMap<BridgeId, (Arc<SessionHandle>, Vec<EndpointDirective>)> =
            IndexMap::new();
        for (endpoint, audio, video) in endpoints {
            let Some(handle) = self.session_of(&endpoint).await else {
                continue;
            };
            let bridge_id = handle.bridge_id();
            let mut directive = EndpointDirective::modify(endpoint);
            directive.audio_force_muted = audio;
            directive.video_force_muted = video;
            by_session
                .entry(bridge_id)
                .or_insert_with(|| (handle, Vec::new()))
                .1
                .push(directive);
        }

        for (bridge_id, (handle, directives)) in by_session {
            let mut request = ColibriRequest::new(bridge_id, self.meeting_id.clone());
            request.endpoints = directives;
            self.send_update(&handle, request).await;
        }
    }

    // ---- expiry ----

    /// Expire one endpoint. A no-op when the endpoint is unknown;
    /// expiring the last endpoint of a session expires the session
    /// itself.
    pub async fn expire_participant(&self, endpoint: &EndpointId) {
        let Some(handle) = self.session_of(endpoint).await else {
            tracing::debug!("Expire for unknown endpoint {} is a no-op", endpoint);
            return;
        };
        let (bridge_id, now_empty) = {
            let mut info = handle.info.lock();
            info.participants.remove(endpoint);
            (info.bridge.id.clone(), info.participants.is_empty())
        };

        let mut request = ColibriRequest::new(bridge_id.clone(), self.meeting_id.clone());
        request.endpoints.push(EndpointDirective::expire(endpoint.clone()));
        self.send_update(&handle, request).await;

        if now_empty {
            tracing::info!("Last endpoint gone, expiring bridge session on {}", bridge_id);
            self.teardown_session(&bridge_id).await;
        } else {
            self.advertise_remote_endpoints(&bridge_id).await;
        }
    }

    /// Remove a session locally and expire the relays peers hold
    /// towards it.
    async fn teardown_session(&self, bridge_id: &BridgeId) {
        let (removed, survivors) = {
            let mut state = self.state.lock().await;
            let removed = state.sessions.shift_remove(bridge_id);
            state.cascade.remove_bridge(bridge_id);
            let survivors: Vec<Arc<SessionHandle>> =
                state.sessions.values().cloned().collect();
            (removed, survivors)
        };
        let Some(handle) = removed else {
            return;
        };

        let relay_id = handle.info.lock().relay_id().map(str::to_string);
        if let Some(relay_id) = relay_id {
            for survivor in survivors {
                let survivor_bridge = survivor.bridge_id();
                let had_relay = survivor.info.lock().relays.remove(bridge_id).is_some();
                if !had_relay {
                    continue;
                }
                let mut request =
                    ColibriRequest::new(survivor_bridge, self.meeting_id.clone());
                request.relays.push(RelayDirective {
                    id: relay_id.clone(),
                    op: DirectiveOp::Expire,
                    mesh_id: None,
                    initiator: None,
                    transport: None,
                    remote_endpoints: Vec::new(),
                });
                self.send_update(&survivor, request).await;
            }
        }
    }

    /// React to bridges going down: drop their sessions without
    /// signaling them and return the endpoints that need a re-invite.
    pub async fn bridges_down(&self, bridges: &[BridgeId]) -> Vec<EndpointId> {
        let mut affected = Vec::new();
        let mut state = self.state.lock().await;
        for bridge_id in bridges {
            let Some(handle) = state.sessions.shift_remove(bridge_id) else {
                continue;
            };
            {
                let mut info = handle.info.lock();
                info.failed = true;
                affected.extend(info.participants.keys().cloned());
            }
            state.cascade.remove_bridge(bridge_id);
            for survivor in state.sessions.values() {
                survivor.info.lock().relays.remove(bridge_id);
            }
            tracing::warn!("Bridge {} down, session discarded", bridge_id);
        }
        affected
    }

    /// Shut the manager down, expiring every session best-effort.
    pub async fn dispose(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
            let handles = state.sessions.values().cloned().collect();
            state.sessions.clear();
            state.cascade = Cascade::new();
            handles
        };
        for handle in handles {
            let bridge_id = handle.bridge_id();
            let leftover: Vec<EndpointId> =
                handle.info.lock().participants.keys().cloned().collect();
            let mut request = ColibriRequest::new(bridge_id, self.meeting_id.clone());
            request.endpoints = leftover.into_iter().map(EndpointDirective::expire).collect();
            // Best effort; errors on dispose are only logged.
            let _gate = handle.request_gate.lock().await;
            if let Err(e) = self.send_raw(request).await {
                tracing::debug!("Expire on dispose failed: {}", e);
            }
        }
    }

    // ---- relays ----

    /// Create the relay pair between two cascaded bridges. The earlier
    /// session initiates; roles at the two ends are complementary.
    async fn create_relay_pair(&self, initiator_id: &BridgeId, responder_id: &BridgeId) {
        let (initiator, responder) = {
            let state = self.state.lock().await;
            (
                state.sessions.get(initiator_id).cloned(),
                state.sessions.get(responder_id).cloned(),
            )
        };
        let (Some(initiator), Some(responder)) = (initiator, responder) else {
            return;
        };

        let initiator_relay_id = initiator.info.lock().relay_id().map(str::to_string);
        let responder_relay_id = responder.info.lock().relay_id().map(str::to_string);
        let (Some(initiator_relay_id), Some(responder_relay_id)) =
            (initiator_relay_id, responder_relay_id)
        else {
            tracing::warn!(
                "Not creating relay {} <-> {}: missing relay id",
                initiator_id,
                responder_id
            );
            return;
        };

        initiator.info.lock().relays.insert(
            responder_id.clone(),
            Relay::new(
                responder_id.clone(),
                responder_relay_id.clone(),
                DEFAULT_MESH.to_string(),
                true,
            ),
        );
        responder.info.lock().relays.insert(
            initiator_id.clone(),
            Relay::new(
                initiator_id.clone(),
                initiator_relay_id.clone(),
                DEFAULT_MESH.to_string(),
                false,
            ),
        );

        // Step 1: create on the initiating side, advertising the
        // responder's endpoints; await its transport.
        let responder_endpoints = responder.info.lock().remote_endpoints();
        let mut request = ColibriRequest::new(initiator_id.clone(), self.meeting_id.clone());
        request.relays.push(RelayDirective {
            id: responder_relay_id.clone(),
            op: DirectiveOp::Create,
            mesh_id: Some(DEFAULT_MESH.to_string()),
            initiator: Some(true),
            transport: None,
            remote_endpoints: responder_endpoints,
        });
        let Some(mut initiator_transport) = self
            .send_relay_request(&initiator, request, &responder_relay_id)
            .await
        else {
            return;
        };

        // The initiating end runs DTLS active; rewrite its actpass
        // fingerprints before handing them to the passive peer, and
        // strip websockets the passive peer must not dial.
        rewrite_fingerprints(&mut initiator_transport, true);
        strip_websockets_if_passive(
            &mut initiator_transport,
            self.config.octo.sctp_datachannels,
            false,
        );

        // Step 2: create on the responding side with the initiator's
        // transport and endpoints.
        let initiator_endpoints = initiator.info.lock().remote_endpoints();
        let mut request = ColibriRequest::new(responder_id.clone(), self.meeting_id.clone());
        request.relays.push(RelayDirective {
            id: initiator_relay_id.clone(),
            op: DirectiveOp::Create,
            mesh_id: Some(DEFAULT_MESH.to_string()),
            initiator: Some(false),
            transport: Some(initiator_transport),
            remote_endpoints: initiator_endpoints,
        });
        let Some(mut responder_transport) = self
            .send_relay_request(&responder, request, &initiator_relay_id)
            .await
        else {
            return;
        };

        // Step 3: complete the pair by forwarding the responder's
        // (passive) transport back to the initiator.
        rewrite_fingerprints(&mut responder_transport, false);
        let mut request = ColibriRequest::new(initiator_id.clone(), self.meeting_id.clone());
        request.relays.push(RelayDirective {
            id: responder_relay_id.clone(),
            op: DirectiveOp::Modify,
            mesh_id: None,
            initiator: None,
            transport: Some(responder_transport),
            remote_endpoints: Vec::new(),
        });
        self.send_update(&initiator, request).await;

        for (handle, peer) in [(&initiator, responder_id), (&responder, initiator_id)] {
            if let Some(relay) = handle.info.lock().relays.get_mut(peer) {
                relay.state = RelayState::Active;
            }
        }
        tracing::info!("Relay pair established {} <-> {}", initiator_id, responder_id);
    }

    /// Send a relay create and pull the relay transport out of the
    /// response. Failures mark the session failed.
    async fn send_relay_request(
        &self,
        handle: &Arc<SessionHandle>,
        request: ColibriRequest,
        relay_id: &str,
    ) -> Option<Transport> {
        let bridge_id = request.bridge.clone();
        let _gate = handle.request_gate.lock().await;
        match self.send_raw(request).await {
            Ok(ColibriResponse::ConferenceModified { relays, .. }) => {
                match relays.iter().find(|r| r.id == relay_id).and_then(|r| r.transport.clone())
                {
                    Some(transport) => Some(transport),
                    None => {
                        tracing::error!(
                            "Bridge {} relay response misses transport for {}",
                            bridge_id,
                            relay_id
                        );
                        drop(_gate);
                        self.fail_session(&bridge_id).await;
                        None
                    }
                }
            }
            Ok(ColibriResponse::Error { reason, message }) => {
                tracing::error!(
                    "Bridge {} rejected relay request: {} ({})",
                    bridge_id,
                    message,
                    reason
                );
                drop(_gate);
                self.fail_session(&bridge_id).await;
                None
            }
            Err(TransportError::Timeout) => {
                tracing::error!("Relay request to {} timed out", bridge_id);
                drop(_gate);
                self.fail_session(&bridge_id).await;
                None
            }
            Err(TransportError::Connection(reason)) => {
                tracing::error!("Bridge {} unreachable during relay setup: {}", bridge_id, reason);
                self.registry.mark_failed(&bridge_id);
                drop(_gate);
                self.fail_session(&bridge_id).await;
                None
            }
        }
    }

    /// Refresh the remote-endpoint advertisement of `bridge_id` on
    /// every peer it relays with. Declarative full-state updates keep
    /// this idempotent.
    async fn advertise_remote_endpoints(&self, bridge_id: &BridgeId) {
        let (source_handle, peers) = {
            let state = self.state.lock().await;
            let peers: Vec<(BridgeId, Arc<SessionHandle>)> = state
                .sessions
                .iter()
                .filter(|(id, _)| *id != bridge_id)
                .map(|(id, h)| (id.clone(), h.clone()))
                .collect();
            (state.sessions.get(bridge_id).cloned(), peers)
        };
        let Some(source_handle) = source_handle else {
            return;
        };

        let (relay_id, endpoints) = {
            let info = source_handle.info.lock();
            (info.relay_id().map(str::to_string), info.remote_endpoints())
        };
        let Some(relay_id) = relay_id else {
            return;
        };

        for (peer_id, peer_handle) in peers {
            let has_relay = peer_handle.info.lock().relays.contains_key(bridge_id);
            if !has_relay {
                continue;
            }
            let mut request = ColibriRequest::new(peer_id, self.meeting_id.clone());
            request.relays.push(RelayDirective {
                id: relay_id.clone(),
                op: DirectiveOp::Modify,
                mesh_id: None,
                initiator: None,
                transport: None,
                remote_endpoints: endpoints.clone(),
            });
            self.send_update(&peer_handle, request).await;
        }
    }

    // ---- plumbing ----

    async fn send_raw(
        &self,
        request: ColibriRequest,
    ) -> Result<ColibriResponse, TransportError> {
        match tokio::time::timeout(
            self.config.bridge.reply_timeout(),
            self.transport.send(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Update semantics: a timed-out reply is logged and dropped with
    /// no state mutation; an explicit error response is fatal to the
    /// session.
    async fn send_update(&self, handle: &Arc<SessionHandle>, request: ColibriRequest) {
        let bridge_id = request.bridge.clone();
        let outcome = {
            let _gate = handle.request_gate.lock().await;
            self.send_raw(request).await
        };
        match outcome {
            Ok(ColibriResponse::ConferenceModified { .. }) => {}
            Ok(ColibriResponse::Error { reason, message }) => {
                tracing::error!(
                    "Bridge {} rejected update: {} ({}), failing session",
                    bridge_id,
                    message,
                    reason
                );
                match reason {
                    ColibriErrorReason::ConferenceNotFound
                    | ColibriErrorReason::UnknownEndpoint => {
                        self.discard_session(&bridge_id).await;
                    }
                    ColibriErrorReason::BadRequest => {
                        self.fail_session(&bridge_id).await;
                    }
                    _ => {
                        self.registry.mark_failed(&bridge_id);
                        self.fail_session(&bridge_id).await;
                    }
                }
            }
            Err(TransportError::Timeout) => {
                tracing::warn!("Update request to {} timed out, dropped", bridge_id);
            }
            Err(TransportError::Connection(reason)) => {
                tracing::error!("Bridge {} unreachable: {}", bridge_id, reason);
                self.registry.mark_failed(&bridge_id);
                self.fail_session(&bridge_id).await;
            }
        }
    }

    /// Remove a session after a fatal failure and tell the conference
    /// which endpoints need a new home.
    async fn fail_session(&self, bridge_id: &BridgeId) {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.sessions.shift_remove(bridge_id);
            if removed.is_some() {
                state.cascade.remove_bridge(bridge_id);
                for survivor in state.sessions.values() {
                    survivor.info.lock().relays.remove(bridge_id);
                }
            }
            removed
        };
        if let Some(handle) = removed {
            let endpoints: Vec<EndpointId> = {
                let mut info = handle.info.lock();
                info.failed = true;
                info.participants.keys().cloned().collect()
            };
            self.emitter.emit(&ColibriSessionEvent::SessionFailed {
                bridge: bridge_id.clone(),
                endpoints,
            });
        }
    }

    /// Drop a session the bridge forgot or rejected. Endpoints that
    /// were already allocated on it still need a re-invite, so they are
    /// surfaced the same way as on failure.
    async fn discard_session(&self, bridge_id: &BridgeId) {
        let removed = {
            let mut state = self.state.lock().await;
            let removed = state.sessions.shift_remove(bridge_id);
            if removed.is_some() {
                state.cascade.remove_bridge(bridge_id);
                for survivor in state.sessions.values() {
                    survivor.info.lock().relays.remove(bridge_id);
                }
            }
            removed
        };
        if let Some(handle) = removed {
            let endpoints: Vec<EndpointId> =
                handle.info.lock().participants.keys().cloned().collect();
            if !endpoints.is_empty() {
                self.emitter.emit(&ColibriSessionEvent::SessionFailed {
                    bridge: bridge_id.clone(),
                    endpoints,
                });
            }
        }
    }

    async fn session_of(&self, endpoint: &EndpointId) -> Option<Arc<SessionHandle>> {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .find(|h| h.info.lock().participants.contains_key(endpoint))
            .cloned()
    }

    // ---- introspection ----

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    pub async fn conference_bridges(&self) -> Vec<(BridgeId, usize)> {
        let state = self.state.lock().await;
        state
            .sessions
            .iter()
            .map(|(id, h)| (id.clone(), h.info.lock().participant_count()))
            .collect()
    }

    pub async fn participants_of(&self, bridge_id: &BridgeId) -> Vec<EndpointId> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(bridge_id)
            .map(|h| h.info.lock().participants.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn cascade_snapshot(&self) -> Cascade {
        self.state.lock().await.cascade.clone()
    }

    pub async fn session_snapshots(&self) -> Vec<BridgeSessionSnapshot> {
        let state = self.state.lock().await;
        state.sessions.values().map(|h| h.info.lock().snapshot()).collect()
    }
}

impl std::fmt::Debug for ColibriSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColibriSessionManager")
            .field("meeting_id", &self.meeting_id)
            .finish()
    }
}
