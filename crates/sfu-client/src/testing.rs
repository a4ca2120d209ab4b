//! In-memory bridge and recording media engine shared by the unit tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use groupcall_core::{
    conference::AUDIO_CONTENT, Candidate, CandidateType, Channel, ChannelBundle, ChannelPatch,
    ConferenceDescription, ConferencePatch, Content, Fingerprint, IceCredentials, Transport,
};
use tokio::sync::{mpsc, Notify};

use crate::{bridge::ConferenceApi, engine::MediaEngine, error::BridgeError};

#[derive(Default)]
pub(crate) struct FakeBridgeState {
    pub conference: Option<ConferenceDescription>,
    pub list_failures: usize,
    pub get_failures: usize,
    pub patch_failures: usize,
    /// While set, `get_conference` waits for a notification before answering.
    pub get_gate: Option<Arc<Notify>>,
    pub omit_transport: bool,
    pub list_calls: usize,
    pub get_calls: usize,
    pub create_calls: usize,
    pub patches: Vec<ConferencePatch>,
    next_source: u32,
}

/// Bridge double that assigns channel ids and sources the way a real bridge does.
#[derive(Default)]
pub(crate) struct FakeBridge {
    state: Mutex<FakeBridgeState>,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeBridgeState) -> R) -> R {
        let mut state = self.state.lock().expect("bridge lock");
        f(&mut state)
    }

    pub fn seed_conference(&self, id: &str) {
        self.with(|state| state.conference = Some(empty_conference(id)));
    }

    pub fn add_remote(&self, endpoint: &str, ssrc: u32) {
        self.with(|state| {
            let conference = state.conference.as_mut().expect("conference exists");
            audio_content(conference).channels.push(Channel {
                id: Some(format!("ch-{endpoint}")),
                ssrcs: vec![ssrc],
                initiator: false,
                ..Channel::local_audio(endpoint)
            });
        });
    }

    pub fn remove_remote(&self, endpoint: &str) {
        self.with(|state| {
            let conference = state.conference.as_mut().expect("conference exists");
            audio_content(conference)
                .channels
                .retain(|channel| channel.endpoint != endpoint);
        });
    }
}

fn empty_conference(id: &str) -> ConferenceDescription {
    ConferenceDescription {
        id: id.into(),
        channel_bundles: Vec::new(),
        contents: vec![Content {
            name: AUDIO_CONTENT.into(),
            channels: Vec::new(),
        }],
    }
}

fn audio_content(conference: &mut ConferenceDescription) -> &mut Content {
    if !conference
        .contents
        .iter()
        .any(|content| content.name == AUDIO_CONTENT)
    {
        conference.contents.push(Content {
            name: AUDIO_CONTENT.into(),
            channels: Vec::new(),
        });
    }
    conference
        .contents
        .iter_mut()
        .find(|content| content.name == AUDIO_CONTENT)
        .expect("audio content")
}

pub(crate) fn bridge_transport() -> Transport {
    Transport {
        credentials: Some(IceCredentials {
            ufrag: "bridge-ufrag".into(),
            pwd: "bridge-pwd".into(),
        }),
        fingerprints: vec![Fingerprint {
            hash: "sha-256".into(),
            fingerprint: "AA:BB:CC".into(),
            setup: "actpass".into(),
        }],
        candidates: vec![Candidate {
            id: "c1".into(),
            generation: 0,
            component: "1".into(),
            protocol: "udp".into(),
            tcp_type: None,
            ip: "192.168.1.5".into(),
            port: 10000,
            foundation: "1".into(),
            priority: 2_130_706_431,
            kind: CandidateType::Host,
            network: 0,
            rel_addr: None,
            rel_port: None,
        }],
    }
}

#[async_trait]
impl ConferenceApi for FakeBridge {
    async fn list_conferences(&self) -> Result<Vec<ConferenceDescription>, BridgeError> {
        self.with(|state| {
            state.list_calls += 1;
            if state.list_failures > 0 {
                state.list_failures -= 1;
                return Err(BridgeError::Server("bridge offline".into()));
            }
            Ok(state.conference.clone().into_iter().collect())
        })
    }

    async fn get_conference(&self, _id: &str) -> Result<ConferenceDescription, BridgeError> {
        let gate = self.with(|state| state.get_gate.clone());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.with(|state| {
            state.get_calls += 1;
            if state.get_failures > 0 {
                state.get_failures -= 1;
                return Err(BridgeError::Server("bridge offline".into()));
            }
            state
                .conference
                .clone()
                .ok_or_else(|| BridgeError::Server("404 Not Found".into()))
        })
    }

    async fn create_conference(&self) -> Result<ConferenceDescription, BridgeError> {
        self.with(|state| {
            state.create_calls += 1;
            let conference = empty_conference("conf-1");
            state.conference = Some(conference.clone());
            Ok(conference)
        })
    }

    async fn patch_conference(
        &self,
        id: &str,
        patch: &ConferencePatch,
    ) -> Result<ConferenceDescription, BridgeError> {
        self.with(|state| {
            state.patches.push(patch.clone());
            if state.patch_failures > 0 {
                state.patch_failures -= 1;
                return Err(BridgeError::Server("500 Internal Server Error".into()));
            }
            let omit_transport = state.omit_transport;
            let mut next_source = state.next_source;
            let conference = state
                .conference
                .as_mut()
                .filter(|conference| conference.id == id)
                .ok_or_else(|| BridgeError::Server("404 Not Found".into()))?;

            for entry in patch.contents.iter().flat_map(|content| &content.channels) {
                let ChannelPatch::Full(channel) = entry else {
                    continue;
                };
                let mut channel = channel.clone();
                channel.id.get_or_insert_with(|| format!("ch-{}", channel.endpoint));
                if channel.sources.is_empty() {
                    next_source += 1;
                    channel.sources = vec![1000 + next_source];
                }

                if !omit_transport
                    && !conference
                        .channel_bundles
                        .iter()
                        .any(|bundle| bundle.id == channel.channel_bundle_id)
                {
                    conference.channel_bundles.push(ChannelBundle {
                        id: channel.channel_bundle_id.clone(),
                        transport: bridge_transport(),
                    });
                }

                let channels = &mut audio_content(conference).channels;
                match channels
                    .iter_mut()
                    .find(|existing| existing.endpoint == channel.endpoint)
                {
                    Some(existing) => *existing = channel,
                    None => channels.push(channel),
                }
            }

            let response = conference.clone();
            state.next_source = next_source;
            Ok(response)
        })
    }
}

/// Media engine double forwarding every offer to a channel the test reads.
pub(crate) struct RecordingEngine {
    offers: mpsc::UnboundedSender<String>,
    pub mutes: Mutex<Vec<bool>>,
}

impl RecordingEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (offers, receiver) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            offers,
            mutes: Mutex::new(Vec::new()),
        });
        (engine, receiver)
    }
}

impl MediaEngine for RecordingEngine {
    fn set_offer_sdp(&self, sdp: &str, _is_partial: bool) {
        let _ = self.offers.send(sdp.to_owned());
    }

    fn set_is_muted(&self, is_muted: bool) {
        self.mutes.lock().expect("mutes lock").push(is_muted);
    }
}

/// A minimal media-engine answer announcing `ssrc`.
pub(crate) fn answer_for(ssrc: u32) -> String {
    format!(
        "v=0\r\n\
         a=ice-ufrag:abc\r\n\
         a=ice-pwd:xyz\r\n\
         a=fingerprint:sha-256 11:22:33\r\n\
         a=ssrc:{ssrc} cname:local\r\n\
         a=ssrc:{ssrc} msid:local audio\r\n"
    )
}

pub(crate) async fn next_offer_containing(
    offers: &mut mpsc::UnboundedReceiver<String>,
    needle: &str,
) -> String {
    loop {
        let sdp = offers.recv().await.expect("engine channel open");
        if sdp.contains(needle) {
            return sdp;
        }
    }
}
