//! # ShockOsc Bridge
//!
//! Bridges the avatar-parameter protocol of a social VR client to a remote
//! shock-device control API. Parameter changes arriving over OSC become
//! timed, rate-limited, safety-gated device commands; derived state is
//! published back into the same parameter space.
//!
//! ## Architecture
//!
//! The crate is split into several modules:
//!
//! - `osc`: UDP transport, message model and change-tracked parameters
//! - `oscquery`: mDNS + HTTP/JSON discovery of the game client
//! - `config`: live behavior/group configuration boundary
//! - `groups`: runtime state per control target
//! - `engine`: trigger state machine, safety gates and command dispatch
//! - `live`: persistent per-device control streams
//! - `chatbox`: rate-paced in-game text feedback
//!
//! Everything runs headlessly: the core is driven entirely through its OSC
//! and discovery interfaces, and the remote control API is an injected
//! trait object.

pub mod chatbox;
pub mod config;
pub mod engine;
pub mod error;
pub mod groups;
pub mod live;

pub mod osc {
    pub mod params;
    pub mod transport;
    pub mod types;
}

/// Service discovery: finding the game's OSC endpoint and advertising ours
pub mod oscquery {
    pub mod discovery;
    pub mod json;
    pub mod server;
}
