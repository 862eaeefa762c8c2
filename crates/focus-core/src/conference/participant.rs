//! Per-participant signaling state.

use std::collections::HashSet;
use std::time::Instant;

use crate::colibri::{ColibriAllocation, Transport};
use crate::errors::{FocusError, Result};
use crate::room::{ChatRoomMember, Feature, MemberRole, OccupantId};
use crate::source::EndpointId;

/// The signaling state machine of one participant.
///
/// `Terminated` is absorbing; bridge resources are expired exactly
/// once on the way in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    Created,
    Allocating,
    Invited,
    Established,
    Reinviting,
    Terminated,
}

impl ParticipantState {
    fn can_transition_to(self, next: ParticipantState) -> bool {
        use ParticipantState::*;
        match (self, next) {
            (_, Terminated) => true,
            (Created, Allocating) => true,
            (Allocating, Invited) => true,
            (Allocating, Reinviting) => true,
            (Invited, Established) => true,
            (Invited, Reinviting) => true,
            (Established, Established) => true,
            (Established, Reinviting) => true,
            (Reinviting, Allocating) => true,
            _ => false,
        }
    }
}

/// One participant as the conference controller sees it.
#[derive(Debug, Clone)]
pub struct Participant {
    pub endpoint_id: EndpointId,
    pub occupant: OccupantId,
    pub role: MemberRole,
    pub region: Option<String>,
    pub stats_id: Option<String>,
    pub features: HashSet<Feature>,
    pub video_codecs: Vec<String>,
    state: ParticipantState,
    /// Opaque per-bridge allocation handle, present from Invited on.
    pub allocation: Option<ColibriAllocation>,
    /// Transport advertised by the participant, accumulated across
    /// transport-info updates.
    pub transport: Transport,
    /// Guards exactly-once bridge expiry on termination.
    pub expired: bool,
    pub reinvite_attempts: u32,
    pub created_at: Instant,
}

impl Participant {
    pub fn from_member(member: &ChatRoomMember) -> Self {
        Self {
            endpoint_id: member.endpoint_id.clone(),
            occupant: member.occupant.clone(),
            role: member.role,
            region: member.region.clone(),
            stats_id: member.stats_id.clone(),
            features: member.features.clone(),
            video_codecs: member.video_codecs.clone(),
            state: ParticipantState::Created,
            allocation: None,
            transport: Transport::default(),
            expired: false,
            reinvite_attempts: 0,
            created_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ParticipantState {
        self.state
    }

    /// Centralized transition; everything else reads the state tag.
    pub fn set_state(&mut self, next: ParticipantState) -> Result<()> {
        if self.state == ParticipantState::Terminated && next != ParticipantState::Terminated {
            return Err(FocusError::invalid_state(format!(
                "participant {} is terminated",
                self.endpoint_id
            )));
        }
        if !self.state.can_transition_to(next) {
            return Err(FocusError::invalid_state(format!(
                "participant {}: invalid transition {:?} -> {:?}",
                self.endpoint_id, self.state, next
            )));
        }
        if self.state != next {
            tracing::debug!(
                "Participant {} {:?} -> {:?}",
                self.endpoint_id,
                self.state,
                next
            );
        }
        self.state = next;
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.state == ParticipantState::Established
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ParticipantState::Terminated
    }

    pub fn is_visitor(&self) -> bool {
        self.role.is_visitor()
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Fold a transport-info update in.
    pub fn merge_transport(&mut self, update: &Transport) {
        self.transport.merge(update);
    }
}
