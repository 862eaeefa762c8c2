//! Bridge registry and selection.
//!
//! Tracks the known media bridges (load, region, health) and picks one
//! per allocation decision.

mod bridge;
mod registry;
mod selector;

pub use bridge::{Bridge, BridgeId};
pub use registry::{BridgeEvent, BridgeRegistry};
pub use selector::{
    BridgeSelector, ExternalSelectorClient, ExternalSelectorError, ParticipantProperties,
    SelectorSnapshot,
};
