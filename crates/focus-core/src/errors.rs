//! Crate-level error type.
//!
//! Subsystems keep their own error enums; this type aggregates them at
//! the conference-controller surface.

use crate::colibri::AllocationFailure;
use crate::room::JsonParseError;
use crate::source::ValidationError;

/// Result type alias for focus-core operations.
pub type Result<T> = std::result::Result<T, FocusError>;

/// Errors surfaced by the conference controller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FocusError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Allocation(#[from] AllocationFailure),

    #[error(transparent)]
    Parse(#[from] JsonParseError),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("conference is shut down")]
    Disposed,
}

impl FocusError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        FocusError::InvalidState(message.into())
    }

    pub fn participant_not_found(id: impl std::fmt::Display) -> Self {
        FocusError::ParticipantNotFound(id.to_string())
    }
}
