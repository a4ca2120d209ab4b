use std::{fmt, str::FromStr};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::wire;

/// Name of the only content section this client produces or mutates.
pub const AUDIO_CONTENT: &str = "audio";
/// Channel lifetime requested for freshly allocated channels, in seconds.
pub const DEFAULT_CHANNEL_EXPIRE_SECS: u32 = 10;
/// Relay type requested for the local channel.
pub const TRANSLATOR_RELAY: &str = "translator";

#[derive(Debug, Error)]
pub enum ConferenceParseError {
    #[error("conference description is missing its id")]
    MissingId,
    #[error("transport of channel bundle '{bundle}' is missing ICE credentials")]
    MissingCredentials { bundle: String },
    #[error("expected a JSON {expected}")]
    UnexpectedShape { expected: &'static str },
    #[error("malformed conference description: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bridge-side view of a conference, fetched fresh on every round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferenceDescription {
    pub id: String,
    pub channel_bundles: Vec<ChannelBundle>,
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBundle {
    pub id: String,
    pub transport: Transport,
}

/// ICE/DTLS parameters shared by every channel of a bundle.
///
/// `credentials` is `None` until a local description exists; such transports
/// are sent without `ufrag`/`pwd` rather than with empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    pub credentials: Option<IceCredentials>,
    pub fingerprints: Vec<Fingerprint>,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub fingerprint: String,
    pub setup: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub generation: u32,
    pub component: String,
    pub protocol: String,
    pub tcp_type: Option<String>,
    pub ip: String,
    pub port: u16,
    pub foundation: String,
    pub priority: u32,
    pub kind: CandidateType,
    pub network: u32,
    pub rel_addr: Option<String>,
    pub rel_port: Option<u16>,
}

/// ICE candidate type. Types this client does not know are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    Srflx,
    Prflx,
    Relay,
    Other(String),
}

impl CandidateType {
    pub fn as_str(&self) -> &str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Prflx => "prflx",
            CandidateType::Relay => "relay",
            CandidateType::Other(kind) => kind,
        }
    }

    /// Everything but host candidates advertises the address it was derived from.
    pub fn has_related_address(&self) -> bool {
        !matches!(self, CandidateType::Host)
    }
}

impl FromStr for CandidateType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "host" => CandidateType::Host,
            "srflx" => CandidateType::Srflx,
            "prflx" => CandidateType::Prflx,
            "relay" => CandidateType::Relay,
            other => CandidateType::Other(other.to_owned()),
        })
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub name: String,
    pub channels: Vec<Channel>,
}

/// One participant's media leg inside a content section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Option<String>,
    pub endpoint: String,
    pub channel_bundle_id: String,
    pub sources: Vec<u32>,
    pub ssrcs: Vec<u32>,
    pub rtp_level_relay_type: String,
    pub expire: Option<u32>,
    pub initiator: bool,
    pub direction: Direction,
    pub ssrc_groups: Vec<SsrcGroup>,
    pub payload_types: Vec<PayloadType>,
    pub rtp_hdr_exts: Vec<RtpHdrExt>,
}

impl Channel {
    /// A new local audio channel as requested during allocation.
    pub fn local_audio(bundle_id: &str) -> Self {
        Self {
            id: None,
            endpoint: bundle_id.to_owned(),
            channel_bundle_id: bundle_id.to_owned(),
            sources: Vec::new(),
            ssrcs: Vec::new(),
            rtp_level_relay_type: TRANSLATOR_RELAY.to_owned(),
            expire: Some(DEFAULT_CHANNEL_EXPIRE_SECS),
            initiator: true,
            direction: Direction::SendRecv,
            ssrc_groups: Vec::new(),
            payload_types: Vec::new(),
            rtp_hdr_exts: Vec::new(),
        }
    }

    fn without_media_details(&self) -> Self {
        Self {
            ssrc_groups: Vec::new(),
            payload_types: Vec::new(),
            rtp_hdr_exts: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::SendRecv => "sendrecv",
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::Inactive => "inactive",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sendrecv" => Ok(Direction::SendRecv),
            "sendonly" => Ok(Direction::SendOnly),
            "recvonly" => Ok(Direction::RecvOnly),
            "inactive" => Ok(Direction::Inactive),
            other => Err(format!("unsupported direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrcGroup {
    pub semantics: String,
    pub sources: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadType {
    pub id: u32,
    pub name: String,
    pub clockrate: u32,
    pub channels: u32,
    pub parameters: Option<Map<String, Value>>,
    pub rtcp_fbs: Vec<RtcpFeedback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpFeedback {
    pub kind: String,
    pub subtype: Option<String>,
}

impl RtcpFeedback {
    pub fn transport_cc() -> Self {
        Self {
            kind: "transport-cc".to_owned(),
            subtype: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHdrExt {
    pub id: u32,
    pub uri: String,
}

/// Body of a PATCH request: only the locally owned channel is sent in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConferencePatch {
    pub id: String,
    pub contents: Vec<ContentPatch>,
    pub channel_bundles: Vec<ChannelBundle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPatch {
    pub name: String,
    pub channels: Vec<ChannelPatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPatch {
    /// Untouched remote channel, reduced to `{"id": ...}`.
    Stub { id: String },
    Full(Channel),
}

impl ConferenceDescription {
    pub fn from_json(value: &Value) -> Result<Self, ConferenceParseError> {
        wire::decode_conference(value)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConferenceParseError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json(&value)
    }

    /// Decodes the body of the conference list endpoint, dropping entries
    /// that do not parse.
    pub fn parse_list(value: &Value) -> Result<Vec<Self>, ConferenceParseError> {
        let entries = value
            .as_array()
            .ok_or(ConferenceParseError::UnexpectedShape { expected: "array" })?;
        Ok(entries
            .iter()
            .filter_map(|entry| match Self::from_json(entry) {
                Ok(conference) => Some(conference),
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparsable conference list entry");
                    None
                }
            })
            .collect())
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.contents
            .iter()
            .flat_map(|content| content.channels.iter())
    }

    pub fn local_channel(&self, endpoint: &str) -> Option<&Channel> {
        self.channels().find(|channel| channel.endpoint == endpoint)
    }

    pub fn bundle(&self, bundle_id: &str) -> Option<&ChannelBundle> {
        self.channel_bundles
            .iter()
            .find(|bundle| bundle.id == bundle_id)
    }

    pub fn bundle_transport(&self, bundle_id: &str) -> Option<&Transport> {
        self.bundle(bundle_id).map(|bundle| &bundle.transport)
    }

    /// Adds a fresh local audio channel and an empty bundle for `bundle_id`.
    ///
    /// Payload, header-extension and ssrc-group data is stripped from the
    /// channels already present in the audio content.
    pub fn with_allocated_channel(&self, bundle_id: &str) -> Self {
        let mut conference = self.clone();
        let local = Channel::local_audio(bundle_id);

        match conference
            .contents
            .iter_mut()
            .find(|content| content.name == AUDIO_CONTENT)
        {
            Some(content) => {
                content.channels = content
                    .channels
                    .iter()
                    .map(Channel::without_media_details)
                    .collect();
                content.channels.push(local);
            }
            None => conference.contents.push(Content {
                name: AUDIO_CONTENT.to_owned(),
                channels: vec![local],
            }),
        }

        conference.channel_bundles.push(ChannelBundle {
            id: bundle_id.to_owned(),
            transport: Transport::default(),
        });
        conference
    }

    /// Reduces the description to what a PATCH for `endpoint` should carry.
    ///
    /// Remote channels without a bridge id cannot be referenced and are left out.
    pub fn patch_for_endpoint(&self, endpoint: &str) -> ConferencePatch {
        let contents = self
            .contents
            .iter()
            .map(|content| ContentPatch {
                name: content.name.clone(),
                channels: content
                    .channels
                    .iter()
                    .filter_map(|channel| {
                        if channel.endpoint == endpoint {
                            Some(ChannelPatch::Full(channel.clone()))
                        } else {
                            channel
                                .id
                                .clone()
                                .map(|id| ChannelPatch::Stub { id })
                        }
                    })
                    .collect(),
            })
            .collect();

        ConferencePatch {
            id: self.id.clone(),
            contents,
            channel_bundles: self
                .channel_bundles
                .iter()
                .filter(|bundle| bundle.id == endpoint)
                .cloned()
                .collect(),
        }
    }
}

impl Serialize for ConferenceDescription {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        wire::ConferenceOut::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConferenceDescription {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ConferenceDescription::from_json(&value).map_err(D::Error::custom)
    }
}

impl Serialize for ConferencePatch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        wire::PatchOut::from(self).serialize(serializer)
    }
}
