//! Colibri session management.
//!
//! One control session per (conference, bridge): allocation, updates,
//! expiry and the inter-bridge relay cascade.

mod cascade;
mod error;
mod manager;
mod relay;
mod session;
mod types;

pub use cascade::{Cascade, DEFAULT_MESH};
pub use error::AllocationFailure;
pub use manager::{
    AllocationRequest, ColibriAllocation, ColibriSessionEvent, ColibriSessionManager,
};
pub use relay::{rewrite_fingerprints, strip_websockets_if_passive, Relay, RelayState};
pub use session::{BridgeSession, BridgeSessionSnapshot, RelaySnapshot};
pub use types::{
    ColibriErrorReason, ColibriRequest, ColibriResponse, ColibriTransport, DirectiveOp,
    DtlsSetup, EndpointDirective, EndpointResponse, Fingerprint, MeetingId, RelayDirective,
    RelayResponse, RemoteEndpoint, SctpDescription, Transport, TransportError,
};
