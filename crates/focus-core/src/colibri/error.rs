//! Allocation failure taxonomy.

use crate::bridge::BridgeId;

/// Why an endpoint allocation did not produce a
/// [`super::ColibriAllocation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationFailure {
    /// No bridge was suitable.
    #[error("no bridge available for selection")]
    BridgeSelectionFailed,

    /// The bridge was unreachable or answered with garbage. When
    /// `restart` is set the conference should discard the session and
    /// re-invite its participants.
    #[error("bridge {bridge} failed (restart={restart})")]
    BridgeFailed { bridge: BridgeId, restart: bool },

    /// The bridge no longer knows the conference id; the session must
    /// be torn down and a fresh create issued.
    #[error("bridge {bridge} expired the conference (restart={restart})")]
    ColibriExpired { bridge: BridgeId, restart: bool },

    /// The bridge rejected the participant's attributes; not retried.
    #[error("bridge rejected the request: {message}")]
    BadRequest { message: String },

    /// The session manager was shut down mid-request.
    #[error("session manager disposed")]
    Disposed,
}

impl AllocationFailure {
    /// Whether the conference should re-invite affected participants.
    pub fn should_restart(&self) -> bool {
        match self {
            AllocationFailure::BridgeFailed { restart, .. } => *restart,
            AllocationFailure::ColibriExpired { restart, .. } => *restart,
            _ => false,
        }
    }
}
