//! Negotiation state machine.
//!
//! One task owns every piece of negotiation state. Bridge calls run as a
//! single in-flight future that a newer call replaces; the poll and retry
//! delays share one timer slot.

use std::{fmt, future::pending, pin::Pin, sync::Arc, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use groupcall_core::{
    apply_answer, build_offer, ConferenceDescription, OfferContext, OfferError, OfferState,
    RemoteOffer, Transport,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Sleep,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    bridge::ConferenceApi,
    config::NegotiationConfig,
    engine::MediaEngine,
    error::{BridgeError, NegotiationError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    Discovering,
    Allocating,
    Negotiating,
    Polling,
    Terminated,
}

impl NegotiationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Discovering => "discovering",
            NegotiationState::Allocating => "allocating",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Polling => "polling",
            NegotiationState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Answer(String),
    ToggleMute,
    Shutdown,
}

enum Outcome {
    Discovered(Result<ConferenceDescription, BridgeError>),
    Allocated {
        bundle_id: String,
        result: Result<ConferenceDescription, BridgeError>,
    },
    AnswerRelayed(Result<ConferenceDescription, NegotiationError>),
    Polled(Result<ConferenceDescription, BridgeError>),
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Retry,
    Poll,
}

/// What the bridge granted us during allocation.
struct Allocation {
    conference_id: String,
    bundle_id: String,
    transport: Transport,
}

impl Allocation {
    fn offer(
        &self,
        config: &NegotiationConfig,
        conference: &ConferenceDescription,
        prior: &OfferState,
    ) -> Result<RemoteOffer, OfferError> {
        let context = OfferContext {
            session_id: config.session_id,
            local_bundle_id: &self.bundle_id,
            bridge_host: &config.bridge_host,
            transport: &self.transport,
        };
        build_offer(conference, &context, Some(prior))
    }
}

/// Receiving ends of the controller's observables plus its command channel.
pub(crate) struct ControllerHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<NegotiationState>,
    pub member_count: watch::Receiver<usize>,
    pub is_muted: watch::Receiver<bool>,
    pub task: JoinHandle<()>,
}

pub(crate) struct Controller {
    config: NegotiationConfig,
    api: Arc<dyn ConferenceApi>,
    engine: Arc<dyn MediaEngine>,
    commands: mpsc::UnboundedReceiver<Command>,
    audio_active: Option<watch::Receiver<bool>>,
    state_tx: watch::Sender<NegotiationState>,
    member_count_tx: watch::Sender<usize>,
    is_muted_tx: watch::Sender<bool>,
    state: NegotiationState,
    allocation: Option<Allocation>,
    offer_state: OfferState,
    backoff: Duration,
    op: Option<BoxFuture<'static, Outcome>>,
    timer: Option<(TimerKind, Pin<Box<Sleep>>)>,
}

impl Controller {
    /// Spawns the controller on the current Tokio runtime.
    pub(crate) fn spawn(
        config: NegotiationConfig,
        api: Arc<dyn ConferenceApi>,
        engine: Arc<dyn MediaEngine>,
        audio_active: watch::Receiver<bool>,
    ) -> ControllerHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(NegotiationState::Idle);
        let (member_count_tx, member_count) = watch::channel(0);
        let (is_muted_tx, is_muted) = watch::channel(false);

        let controller = Controller {
            backoff: config.initial_backoff,
            config,
            api,
            engine,
            commands,
            audio_active: Some(audio_active),
            state_tx,
            member_count_tx,
            is_muted_tx,
            state: NegotiationState::Idle,
            allocation: None,
            offer_state: OfferState::default(),
            op: None,
            timer: None,
        };

        ControllerHandle {
            commands: commands_tx,
            state,
            member_count,
            is_muted,
            task: tokio::spawn(controller.run()),
        }
    }

    async fn run(mut self) {
        info!(session_id = self.config.session_id, "negotiation controller started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Answer(sdp)) => self.on_answer(sdp),
                    Some(Command::ToggleMute) => self.toggle_mute(),
                    Some(Command::Shutdown) | None => break,
                },
                activated = next_activation(&mut self.audio_active) => {
                    self.audio_active = None;
                    if activated {
                        self.begin_discovery();
                    }
                }
                outcome = next_outcome(&mut self.op) => {
                    self.op = None;
                    self.on_outcome(outcome);
                }
                kind = next_timer(&mut self.timer) => {
                    self.timer = None;
                    self.on_timer(kind);
                }
            }
        }
        self.terminate();
        info!(session_id = self.config.session_id, "negotiation controller stopped");
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "negotiation state changed");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn start(&mut self, op: BoxFuture<'static, Outcome>) {
        if self.op.is_some() {
            debug!("superseding in-flight bridge request");
        }
        self.op = Some(op);
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.timer = Some((kind, Box::pin(tokio::time::sleep(delay))));
    }

    fn begin_discovery(&mut self) {
        self.set_state(NegotiationState::Discovering);
        let api = Arc::clone(&self.api);
        self.start(async move { Outcome::Discovered(discover(api.as_ref()).await) }.boxed());
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Discovered(result) => self.on_discovered(result),
            Outcome::Allocated { bundle_id, result } => self.on_allocated(bundle_id, result),
            Outcome::AnswerRelayed(result) => self.on_answer_relayed(result),
            Outcome::Polled(result) => self.on_polled(result),
        }
    }

    fn on_discovered(&mut self, result: Result<ConferenceDescription, BridgeError>) {
        let conference = match result {
            Ok(conference) => conference,
            Err(err) => return self.retry_setup(err.into()),
        };

        let bundle_id = Uuid::new_v4().to_string();
        info!(
            conference_id = %conference.id,
            bundle_id = %bundle_id,
            "allocating local channel"
        );
        self.set_state(NegotiationState::Allocating);

        let patch = conference
            .with_allocated_channel(&bundle_id)
            .patch_for_endpoint(&bundle_id);
        let conference_id = conference.id;
        let api = Arc::clone(&self.api);
        self.start(
            async move {
                let result = api.patch_conference(&conference_id, &patch).await;
                Outcome::Allocated { bundle_id, result }
            }
            .boxed(),
        );
    }

    fn on_allocated(&mut self, bundle_id: String, result: Result<ConferenceDescription, BridgeError>) {
        let conference = match result {
            Ok(conference) => conference,
            Err(err) => return self.retry_setup(err.into()),
        };
        let Some(transport) = conference.bundle_transport(&bundle_id).cloned() else {
            return self.fail(NegotiationError::MissingTransport { bundle_id });
        };

        self.backoff = self.config.initial_backoff;
        let allocation = Allocation {
            conference_id: conference.id.clone(),
            bundle_id,
            transport,
        };
        self.offer_state = OfferState::default();
        let offer = allocation.offer(&self.config, &conference, &self.offer_state);
        self.allocation = Some(allocation);

        match offer {
            Ok(offer) => {
                self.publish_offer(offer);
                self.set_state(NegotiationState::Negotiating);
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn on_answer(&mut self, sdp: String) {
        if self.state == NegotiationState::Terminated {
            warn!("ignoring answer for terminated session");
            return;
        }
        let Some(allocation) = &self.allocation else {
            warn!("ignoring answer received before channel allocation");
            return;
        };

        let api = Arc::clone(&self.api);
        let conference_id = allocation.conference_id.clone();
        let bundle_id = allocation.bundle_id.clone();
        debug!(conference_id = %conference_id, "relaying media engine answer");

        self.timer = None;
        self.start(
            async move {
                let result = relay_answer(api.as_ref(), &conference_id, &bundle_id, &sdp).await;
                Outcome::AnswerRelayed(result)
            }
            .boxed(),
        );
    }

    fn on_answer_relayed(&mut self, result: Result<ConferenceDescription, NegotiationError>) {
        match result {
            Ok(conference) => {
                info!(conference_id = %conference.id, "bridge accepted local description");
                self.set_state(NegotiationState::Polling);
                self.arm(TimerKind::Poll, self.config.poll_interval);
            }
            Err(err) => {
                warn!(error = %err, "failed to relay answer to bridge");
                if self.state == NegotiationState::Polling {
                    self.arm(TimerKind::Poll, self.config.poll_interval);
                }
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Retry => self.begin_discovery(),
            TimerKind::Poll => {
                let Some(allocation) = &self.allocation else {
                    return;
                };
                let api = Arc::clone(&self.api);
                let conference_id = allocation.conference_id.clone();
                self.start(
                    async move { Outcome::Polled(api.get_conference(&conference_id).await) }.boxed(),
                );
            }
        }
    }

    fn on_polled(&mut self, result: Result<ConferenceDescription, BridgeError>) {
        let Some(allocation) = &self.allocation else {
            return;
        };
        match result {
            Ok(conference) if conference.id == allocation.conference_id => {
                match allocation.offer(&self.config, &conference, &self.offer_state) {
                    Ok(offer) => {
                        self.publish_offer(offer);
                        self.arm(TimerKind::Poll, self.config.poll_interval);
                    }
                    Err(err) => self.fail(err.into()),
                }
            }
            Ok(conference) => {
                debug!(
                    expected = %allocation.conference_id,
                    actual = %conference.id,
                    "conference changed; stopping membership poll"
                );
            }
            Err(err) => {
                warn!(error = %err, "membership poll failed");
                self.arm(TimerKind::Poll, self.config.poll_interval);
            }
        }
    }

    fn publish_offer(&mut self, offer: RemoteOffer) {
        for sdp in &offer.sdp_list {
            self.engine.set_offer_sdp(sdp, offer.is_partial);
        }

        let members = offer.state.active_count();
        self.member_count_tx.send_if_modified(|count| {
            if *count == members {
                false
            } else {
                *count = members;
                true
            }
        });
        debug!(slots = offer.state.items.len(), members, "offer handed to media engine");
        self.offer_state = offer.state;
    }

    fn toggle_mute(&mut self) {
        let is_muted = !*self.is_muted_tx.borrow();
        self.is_muted_tx.send_replace(is_muted);
        self.engine.set_is_muted(is_muted);
        debug!(is_muted, "local mute toggled");
    }

    fn retry_setup(&mut self, err: NegotiationError) {
        let delay = self.backoff;
        warn!(
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "conference setup failed"
        );
        self.backoff = (self.backoff * 2).min(self.config.max_backoff);
        self.set_state(NegotiationState::Discovering);
        self.arm(TimerKind::Retry, delay);
    }

    fn fail(&mut self, err: NegotiationError) {
        error!(error = %err, "negotiation aborted");
        self.terminate();
    }

    fn terminate(&mut self) {
        self.op = None;
        self.timer = None;
        self.audio_active = None;
        self.set_state(NegotiationState::Terminated);
    }
}

async fn discover(api: &dyn ConferenceApi) -> Result<ConferenceDescription, BridgeError> {
    match api.list_conferences().await?.into_iter().next() {
        Some(existing) => {
            debug!(conference_id = %existing.id, "joining existing conference");
            api.get_conference(&existing.id).await
        }
        None => {
            debug!("bridge has no conference; creating one");
            api.create_conference().await
        }
    }
}

async fn relay_answer(
    api: &dyn ConferenceApi,
    conference_id: &str,
    bundle_id: &str,
    sdp: &str,
) -> Result<ConferenceDescription, NegotiationError> {
    let fresh = api.get_conference(conference_id).await?;
    let updated = apply_answer(&fresh, bundle_id, sdp)?;
    let patch = updated.patch_for_endpoint(bundle_id);
    let response = api.patch_conference(conference_id, &patch).await?;
    if response.id != conference_id {
        return Err(NegotiationError::ConferenceMismatch {
            expected: conference_id.to_owned(),
            actual: response.id,
        });
    }
    Ok(response)
}

/// Resolves once the audio session reports active, or `false` if the signal
/// source went away first.
async fn next_activation(audio_active: &mut Option<watch::Receiver<bool>>) -> bool {
    match audio_active {
        Some(receiver) => receiver.wait_for(|active| *active).await.is_ok(),
        None => pending().await,
    }
}

async fn next_outcome(op: &mut Option<BoxFuture<'static, Outcome>>) -> Outcome {
    match op {
        Some(op) => op.await,
        None => pending().await,
    }
}

async fn next_timer(timer: &mut Option<(TimerKind, Pin<Box<Sleep>>)>) -> TimerKind {
    match timer {
        Some((kind, sleep)) => {
            sleep.as_mut().await;
            *kind
        }
        None => pending().await,
    }
}
