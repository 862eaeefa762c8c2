//! Conference focus signaling core.
//!
//! For every live multi-party conference this crate maintains the
//! control-plane presence in a chat room, tracks participants and their
//! advertised media sources, selects media bridges and allocates
//! per-endpoint resources on them, and drives the peer-to-focus
//! media-negotiation protocol with each participant.
//!
//! The wire boundaries (XMPP transport, colibri encoding, HTTP admin)
//! stay outside: the crate consumes and produces typed control messages
//! through narrow adapter traits.

pub mod bridge;
pub mod colibri;
pub mod conference;
pub mod config;
pub mod errors;
pub mod room;
pub mod source;

pub use config::FocusConfig;
pub use errors::{FocusError, Result};
