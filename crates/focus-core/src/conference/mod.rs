//! The per-conference controller and its supporting types.

mod conference;
mod events;
mod focus;
mod participant;
mod signaling;

pub use conference::{
    ConferenceRequest, ConferenceSnapshot, FocusConference, ParticipantSnapshot,
};
pub use events::ConferenceEvent;
pub use focus::FocusManager;
pub use participant::{Participant, ParticipantState};
pub use signaling::{filter_sources_for, ConferenceOffer, SignalingMessage, SignalingSender};
