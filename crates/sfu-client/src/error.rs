use groupcall_core::{AnswerError, OfferError};
use thiserror::Error;

/// Failure of a single bridge HTTP call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The request could not be built: bad URL or unserializable payload.
    #[error("malformed bridge request: {0}")]
    Generic(String),
    /// A response arrived but its body was not the expected JSON.
    #[error("unexpected bridge response: {0}")]
    Network(String),
    /// Transport failure or non-success status.
    #[error("bridge request failed: {0}")]
    Server(String),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Offer(#[from] OfferError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error("bridge did not return a transport for bundle '{bundle_id}'")]
    MissingTransport { bundle_id: String },
    #[error("bridge answered for conference '{actual}', expected '{expected}'")]
    ConferenceMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("group call session has shut down")]
pub struct SessionClosed;
