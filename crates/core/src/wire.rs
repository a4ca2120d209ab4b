//! JSON shapes exchanged with the bridge's Colibri REST endpoints.
//!
//! Incoming objects are decoded one element at a time so that a malformed
//! candidate, channel or payload type only drops itself. Outgoing objects are
//! borrowed views over the model.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conference::{
    Candidate, CandidateType, Channel, ChannelBundle, ChannelPatch, ConferenceDescription,
    ConferenceParseError, ConferencePatch, Content, ContentPatch, Direction, Fingerprint,
    IceCredentials, PayloadType, RtcpFeedback, RtpHdrExt, SsrcGroup, Transport,
};

const ICE_UDP_XMLNS: &str = "urn:xmpp:jingle:transports:ice-udp:1";

/// The bridge sends most numbers as strings; plain JSON numbers are accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(u64),
    Text(String),
}

impl Numeric {
    fn parse<T>(&self) -> Option<T>
    where
        T: TryFrom<u64> + FromStr,
    {
        match self {
            Numeric::Number(value) => T::try_from(*value).ok(),
            Numeric::Text(text) => text.trim().parse().ok(),
        }
    }
}

fn elements(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or_default()
}

/// Decodes every element of `value` with `decode`, keeping the ones that succeed.
fn decode_each<T>(value: &Value, what: &'static str, decode: fn(&Value) -> Option<T>) -> Vec<T> {
    elements(value)
        .iter()
        .filter_map(|element| {
            let decoded = decode(element);
            if decoded.is_none() {
                tracing::debug!(kind = what, "dropping malformed bridge entry");
            }
            decoded
        })
        .collect()
}

fn parse_all(values: &[Numeric]) -> Option<Vec<u32>> {
    values.iter().map(Numeric::parse).collect()
}

#[derive(Deserialize)]
struct ConferenceIn {
    id: Option<String>,
    #[serde(rename = "channel-bundles", default)]
    channel_bundles: Value,
    #[serde(default)]
    contents: Value,
}

pub(crate) fn decode_conference(value: &Value) -> Result<ConferenceDescription, ConferenceParseError> {
    if !value.is_object() {
        return Err(ConferenceParseError::UnexpectedShape { expected: "object" });
    }
    let raw = ConferenceIn::deserialize(value)?;
    let id = raw.id.ok_or(ConferenceParseError::MissingId)?;

    let mut channel_bundles = Vec::new();
    for element in elements(&raw.channel_bundles) {
        if let Some(bundle) = decode_bundle(element)? {
            channel_bundles.push(bundle);
        }
    }

    Ok(ConferenceDescription {
        id,
        channel_bundles,
        contents: decode_each(&raw.contents, "content", decode_content),
    })
}

#[derive(Deserialize)]
struct BundleIn {
    id: String,
    transport: Value,
}

#[derive(Deserialize)]
struct TransportIn {
    ufrag: Option<String>,
    pwd: Option<String>,
    #[serde(default)]
    fingerprints: Value,
    #[serde(default)]
    candidates: Value,
}

/// A bundle without id or transport is dropped; a transport without ICE
/// credentials fails the whole conference.
fn decode_bundle(value: &Value) -> Result<Option<ChannelBundle>, ConferenceParseError> {
    let Ok(raw) = BundleIn::deserialize(value) else {
        tracing::debug!(kind = "channel-bundle", "dropping malformed bridge entry");
        return Ok(None);
    };
    let Ok(transport) = TransportIn::deserialize(&raw.transport) else {
        tracing::debug!(bundle = %raw.id, "dropping channel bundle with malformed transport");
        return Ok(None);
    };

    let (Some(ufrag), Some(pwd)) = (transport.ufrag, transport.pwd) else {
        return Err(ConferenceParseError::MissingCredentials { bundle: raw.id });
    };

    Ok(Some(ChannelBundle {
        id: raw.id,
        transport: Transport {
            credentials: Some(IceCredentials { ufrag, pwd }),
            fingerprints: decode_each(&transport.fingerprints, "fingerprint", decode_fingerprint),
            candidates: decode_each(&transport.candidates, "candidate", decode_candidate),
        },
    }))
}

#[derive(Deserialize)]
struct FingerprintIn {
    fingerprint: String,
    setup: String,
    hash: String,
}

fn decode_fingerprint(value: &Value) -> Option<Fingerprint> {
    let raw = FingerprintIn::deserialize(value).ok()?;
    Some(Fingerprint {
        hash: raw.hash,
        fingerprint: raw.fingerprint,
        setup: raw.setup,
    })
}

#[derive(Deserialize)]
struct CandidateIn {
    id: String,
    generation: Option<Numeric>,
    component: String,
    protocol: String,
    tcptype: Option<String>,
    ip: String,
    port: Numeric,
    foundation: String,
    priority: Numeric,
    #[serde(rename = "type")]
    kind: String,
    network: Numeric,
    #[serde(rename = "rel-addr")]
    rel_addr: Option<String>,
    #[serde(rename = "rel-port")]
    rel_port: Option<Numeric>,
}

fn decode_candidate(value: &Value) -> Option<Candidate> {
    let raw = CandidateIn::deserialize(value).ok()?;
    Some(Candidate {
        id: raw.id,
        generation: raw
            .generation
            .as_ref()
            .and_then(Numeric::parse)
            .unwrap_or(0),
        component: raw.component,
        protocol: raw.protocol,
        tcp_type: raw.tcptype,
        ip: raw.ip,
        port: raw.port.parse()?,
        foundation: raw.foundation,
        priority: raw.priority.parse()?,
        kind: CandidateType::from_str(&raw.kind).ok()?,
        network: raw.network.parse()?,
        rel_addr: raw.rel_addr,
        rel_port: raw.rel_port.as_ref().and_then(Numeric::parse),
    })
}

#[derive(Deserialize)]
struct ContentIn {
    name: String,
    #[serde(default)]
    channels: Value,
}

fn decode_content(value: &Value) -> Option<Content> {
    let raw = ContentIn::deserialize(value).ok()?;
    Some(Content {
        name: raw.name,
        channels: decode_each(&raw.channels, "channel", decode_channel),
    })
}

#[derive(Deserialize)]
struct ChannelIn {
    id: String,
    endpoint: String,
    #[serde(rename = "channel-bundle-id")]
    channel_bundle_id: String,
    sources: Vec<Numeric>,
    #[serde(default)]
    ssrcs: Vec<Numeric>,
    #[serde(rename = "rtp-level-relay-type")]
    rtp_level_relay_type: String,
    expire: Option<Numeric>,
    initiator: bool,
    direction: String,
    #[serde(rename = "ssrc-groups", default)]
    ssrc_groups: Value,
    #[serde(rename = "payload-types", default)]
    payload_types: Value,
    #[serde(rename = "rtp-hdrexts", default)]
    rtp_hdr_exts: Value,
}

fn decode_channel(value: &Value) -> Option<Channel> {
    let raw = ChannelIn::deserialize(value).ok()?;
    Some(Channel {
        id: Some(raw.id),
        endpoint: raw.endpoint,
        channel_bundle_id: raw.channel_bundle_id,
        sources: parse_all(&raw.sources)?,
        ssrcs: parse_all(&raw.ssrcs)?,
        rtp_level_relay_type: raw.rtp_level_relay_type,
        expire: raw.expire.as_ref().and_then(Numeric::parse),
        initiator: raw.initiator,
        direction: Direction::from_str(&raw.direction).ok()?,
        ssrc_groups: decode_each(&raw.ssrc_groups, "ssrc-group", decode_ssrc_group),
        payload_types: decode_each(&raw.payload_types, "payload-type", decode_payload_type),
        rtp_hdr_exts: decode_each(&raw.rtp_hdr_exts, "rtp-hdrext", decode_rtp_hdr_ext),
    })
}

#[derive(Deserialize)]
struct SsrcGroupIn {
    semantics: String,
    sources: Vec<Numeric>,
}

fn decode_ssrc_group(value: &Value) -> Option<SsrcGroup> {
    let raw = SsrcGroupIn::deserialize(value).ok()?;
    Some(SsrcGroup {
        semantics: raw.semantics,
        sources: parse_all(&raw.sources)?,
    })
}

#[derive(Deserialize)]
struct PayloadTypeIn {
    id: Numeric,
    name: String,
    clockrate: Numeric,
    channels: Numeric,
    parameters: Option<Value>,
    #[serde(rename = "rtcp-fbs", default)]
    rtcp_fbs: Value,
}

fn decode_payload_type(value: &Value) -> Option<PayloadType> {
    let raw = PayloadTypeIn::deserialize(value).ok()?;
    Some(PayloadType {
        id: raw.id.parse()?,
        name: raw.name,
        clockrate: raw.clockrate.parse()?,
        channels: raw.channels.parse()?,
        parameters: raw.parameters.and_then(|value| value.as_object().cloned()),
        rtcp_fbs: decode_each(&raw.rtcp_fbs, "rtcp-fb", decode_rtcp_feedback),
    })
}

#[derive(Deserialize)]
struct RtcpFeedbackIn {
    #[serde(rename = "type")]
    kind: String,
    subtype: Option<String>,
}

fn decode_rtcp_feedback(value: &Value) -> Option<RtcpFeedback> {
    let raw = RtcpFeedbackIn::deserialize(value).ok()?;
    Some(RtcpFeedback {
        kind: raw.kind,
        subtype: raw.subtype,
    })
}

#[derive(Deserialize)]
struct RtpHdrExtIn {
    id: Numeric,
    uri: String,
}

fn decode_rtp_hdr_ext(value: &Value) -> Option<RtpHdrExt> {
    let raw = RtpHdrExtIn::deserialize(value).ok()?;
    Some(RtpHdrExt {
        id: raw.id.parse()?,
        uri: raw.uri,
    })
}

#[derive(Serialize)]
pub(crate) struct ConferenceOut<'a> {
    id: &'a str,
    contents: Vec<ContentOut<'a>>,
    #[serde(rename = "channel-bundles")]
    channel_bundles: Vec<BundleOut<'a>>,
}

impl<'a> From<&'a ConferenceDescription> for ConferenceOut<'a> {
    fn from(conference: &'a ConferenceDescription) -> Self {
        Self {
            id: &conference.id,
            contents: conference
                .contents
                .iter()
                .map(|content| ContentOut {
                    name: &content.name,
                    channels: content
                        .channels
                        .iter()
                        .map(|channel| ChannelOut::Full(FullChannelOut::from(channel)))
                        .collect(),
                })
                .collect(),
            channel_bundles: conference.channel_bundles.iter().map(BundleOut::from).collect(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct PatchOut<'a> {
    id: &'a str,
    contents: Vec<ContentOut<'a>>,
    #[serde(rename = "channel-bundles")]
    channel_bundles: Vec<BundleOut<'a>>,
}

impl<'a> From<&'a ConferencePatch> for PatchOut<'a> {
    fn from(patch: &'a ConferencePatch) -> Self {
        Self {
            id: &patch.id,
            contents: patch.contents.iter().map(ContentOut::from).collect(),
            channel_bundles: patch.channel_bundles.iter().map(BundleOut::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct ContentOut<'a> {
    name: &'a str,
    channels: Vec<ChannelOut<'a>>,
}

impl<'a> From<&'a ContentPatch> for ContentOut<'a> {
    fn from(content: &'a ContentPatch) -> Self {
        Self {
            name: &content.name,
            channels: content
                .channels
                .iter()
                .map(|channel| match channel {
                    ChannelPatch::Stub { id } => ChannelOut::Stub { id },
                    ChannelPatch::Full(channel) => ChannelOut::Full(FullChannelOut::from(channel)),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChannelOut<'a> {
    Stub { id: &'a str },
    Full(FullChannelOut<'a>),
}

#[derive(Serialize)]
struct FullChannelOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire: Option<u32>,
    initiator: bool,
    endpoint: &'a str,
    direction: &'static str,
    #[serde(rename = "channel-bundle-id")]
    channel_bundle_id: &'a str,
    #[serde(rename = "rtp-level-relay-type")]
    rtp_level_relay_type: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sources: &'a Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssrcs: &'a Vec<u32>,
    #[serde(rename = "ssrc-groups", skip_serializing_if = "Vec::is_empty")]
    ssrc_groups: Vec<SsrcGroupOut<'a>>,
    #[serde(rename = "payload-types", skip_serializing_if = "Vec::is_empty")]
    payload_types: Vec<PayloadTypeOut<'a>>,
    #[serde(rename = "rtp-hdrexts", skip_serializing_if = "Vec::is_empty")]
    rtp_hdr_exts: Vec<RtpHdrExtOut<'a>>,
    #[serde(rename = "rtcp-mux")]
    rtcp_mux: bool,
}

impl<'a> From<&'a Channel> for FullChannelOut<'a> {
    fn from(channel: &'a Channel) -> Self {
        Self {
            id: channel.id.as_deref(),
            expire: channel.expire,
            initiator: channel.initiator,
            endpoint: &channel.endpoint,
            direction: channel.direction.as_str(),
            channel_bundle_id: &channel.channel_bundle_id,
            rtp_level_relay_type: &channel.rtp_level_relay_type,
            sources: &channel.sources,
            ssrcs: &channel.ssrcs,
            ssrc_groups: channel
                .ssrc_groups
                .iter()
                .map(|group| SsrcGroupOut {
                    semantics: &group.semantics,
                    sources: &group.sources,
                })
                .collect(),
            payload_types: channel.payload_types.iter().map(PayloadTypeOut::from).collect(),
            rtp_hdr_exts: channel
                .rtp_hdr_exts
                .iter()
                .map(|ext| RtpHdrExtOut {
                    id: ext.id,
                    uri: &ext.uri,
                })
                .collect(),
            rtcp_mux: true,
        }
    }
}

#[derive(Serialize)]
struct SsrcGroupOut<'a> {
    semantics: &'a str,
    sources: &'a [u32],
}

#[derive(Serialize)]
struct PayloadTypeOut<'a> {
    id: u32,
    name: &'a str,
    clockrate: u32,
    channels: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a Map<String, Value>>,
    #[serde(rename = "rtcp-fbs", skip_serializing_if = "Vec::is_empty")]
    rtcp_fbs: Vec<RtcpFeedbackOut<'a>>,
}

impl<'a> From<&'a PayloadType> for PayloadTypeOut<'a> {
    fn from(payload: &'a PayloadType) -> Self {
        Self {
            id: payload.id,
            name: &payload.name,
            clockrate: payload.clockrate,
            channels: payload.channels,
            parameters: payload.parameters.as_ref(),
            rtcp_fbs: payload
                .rtcp_fbs
                .iter()
                .map(|fb| RtcpFeedbackOut {
                    kind: &fb.kind,
                    subtype: fb.subtype.as_deref(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct RtcpFeedbackOut<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtype: Option<&'a str>,
}

#[derive(Serialize)]
struct RtpHdrExtOut<'a> {
    id: u32,
    uri: &'a str,
}

#[derive(Serialize)]
struct BundleOut<'a> {
    id: &'a str,
    transport: TransportOut<'a>,
}

impl<'a> From<&'a ChannelBundle> for BundleOut<'a> {
    fn from(bundle: &'a ChannelBundle) -> Self {
        Self {
            id: &bundle.id,
            transport: TransportOut::from(&bundle.transport),
        }
    }
}

#[derive(Serialize)]
struct TransportOut<'a> {
    xmlns: &'static str,
    #[serde(rename = "rtcp-mux")]
    rtcp_mux: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ufrag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pwd: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fingerprints: Vec<FingerprintOut<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    candidates: Vec<CandidateOut<'a>>,
}

impl<'a> From<&'a Transport> for TransportOut<'a> {
    fn from(transport: &'a Transport) -> Self {
        let credentials = transport.credentials.as_ref();
        Self {
            xmlns: ICE_UDP_XMLNS,
            rtcp_mux: true,
            ufrag: credentials.map(|c| c.ufrag.as_str()),
            pwd: credentials.map(|c| c.pwd.as_str()),
            fingerprints: transport
                .fingerprints
                .iter()
                .map(|fp| FingerprintOut {
                    fingerprint: &fp.fingerprint,
                    setup: &fp.setup,
                    hash: &fp.hash,
                })
                .collect(),
            candidates: transport.candidates.iter().map(CandidateOut::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct FingerprintOut<'a> {
    fingerprint: &'a str,
    setup: &'a str,
    hash: &'a str,
}

#[derive(Serialize)]
struct CandidateOut<'a> {
    id: &'a str,
    generation: u32,
    component: &'a str,
    protocol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tcptype: Option<&'a str>,
    ip: &'a str,
    port: u16,
    foundation: &'a str,
    priority: u32,
    #[serde(rename = "type")]
    kind: &'a str,
    network: u32,
    #[serde(rename = "rel-addr", skip_serializing_if = "Option::is_none")]
    rel_addr: Option<&'a str>,
    #[serde(rename = "rel-port", skip_serializing_if = "Option::is_none")]
    rel_port: Option<u16>,
}

impl<'a> From<&'a Candidate> for CandidateOut<'a> {
    fn from(candidate: &'a Candidate) -> Self {
        Self {
            id: &candidate.id,
            generation: candidate.generation,
            component: &candidate.component,
            protocol: &candidate.protocol,
            tcptype: candidate.tcp_type.as_deref(),
            ip: &candidate.ip,
            port: candidate.port,
            foundation: &candidate.foundation,
            priority: candidate.priority,
            kind: candidate.kind.as_str(),
            network: candidate.network,
            rel_addr: candidate.rel_addr.as_deref(),
            rel_port: candidate.rel_port,
        }
    }
}
