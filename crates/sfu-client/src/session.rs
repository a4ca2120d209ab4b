use std::sync::Arc;

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    bridge::ConferenceApi,
    config::NegotiationConfig,
    controller::{Command, Controller, NegotiationState},
    engine::{AnswerSink, MediaEngine},
    error::SessionClosed,
};

/// Application-facing handle on one negotiated group call.
///
/// Negotiation starts the first time `audio_active` reports `true`.
/// Dropping the session stops the controller and cancels any pending bridge
/// request or poll.
pub struct GroupCallSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<NegotiationState>,
    member_count: watch::Receiver<usize>,
    is_muted: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl GroupCallSession {
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: NegotiationConfig,
        api: Arc<dyn ConferenceApi>,
        engine: Arc<dyn MediaEngine>,
        audio_active: watch::Receiver<bool>,
    ) -> Self {
        let handle = Controller::spawn(config, api, engine, audio_active);
        Self {
            commands: handle.commands,
            state: handle.state,
            member_count: handle.member_count,
            is_muted: handle.is_muted,
            task: Some(handle.task),
        }
    }

    /// Participants currently present, the local one included.
    pub fn member_count(&self) -> watch::Receiver<usize> {
        self.member_count.clone()
    }

    pub fn is_muted(&self) -> watch::Receiver<bool> {
        self.is_muted.clone()
    }

    pub fn state(&self) -> watch::Receiver<NegotiationState> {
        self.state.clone()
    }

    /// Flips the local mute flag. The bridge is not involved.
    pub fn toggle_mute(&self) -> Result<(), SessionClosed> {
        self.commands
            .send(Command::ToggleMute)
            .map_err(|_| SessionClosed)
    }

    pub fn answer_sink(&self) -> AnswerSink {
        AnswerSink::new(self.commands.clone())
    }

    /// Stops negotiation and waits for the controller to wind down.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "negotiation controller did not exit cleanly");
            }
        }
    }
}

impl Drop for GroupCallSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
