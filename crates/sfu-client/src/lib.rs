//! Client side of bridge-hosted group calls: Colibri HTTP access, the
//! negotiation controller, and the session handle applications hold.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod session;

#[cfg(test)]
mod testing;

pub use bridge::{default_bridge_url, ConferenceApi, HttpBridgeClient, DEFAULT_REQUEST_TIMEOUT};
pub use config::NegotiationConfig;
pub use controller::NegotiationState;
pub use engine::{AnswerSink, MediaEngine};
pub use error::{BridgeError, NegotiationError, SessionClosed};
pub use session::GroupCallSession;
