use tokio::sync::mpsc;

use crate::controller::Command;
use crate::error::SessionClosed;

/// The local media engine the negotiated session drives.
///
/// Calls are made from the controller task and must not block.
pub trait MediaEngine: Send + Sync + 'static {
    fn set_offer_sdp(&self, sdp: &str, is_partial: bool);

    fn set_is_muted(&self, is_muted: bool);
}

/// Hands SDP answers produced by the media engine to the controller.
/// Answers are processed in the order they are delivered.
#[derive(Debug, Clone)]
pub struct AnswerSink {
    commands: mpsc::UnboundedSender<Command>,
}

impl AnswerSink {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { commands }
    }

    pub fn deliver(&self, sdp: impl Into<String>) -> Result<(), SessionClosed> {
        self.commands
            .send(Command::Answer(sdp.into()))
            .map_err(|_| SessionClosed)
    }
}
