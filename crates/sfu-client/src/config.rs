use std::time::Duration;

use rand::Rng;

/// Delay between membership polls once the answer has been relayed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Initial retry delay after a failed discovery or allocation.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound for the setup retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-session negotiation settings. The session id is drawn once here and
/// stays fixed for every offer the session produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Public bridge host substituted for private candidate addresses.
    pub bridge_host: String,
    pub session_id: u32,
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl NegotiationConfig {
    pub fn new(bridge_host: impl Into<String>) -> Self {
        Self {
            bridge_host: bridge_host.into(),
            session_id: random_session_id(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

/// Random SDP session id in `[0, i32::MAX)`.
pub fn random_session_id() -> u32 {
    rand::rng().random_range(0..i32::MAX as u32)
}
