//! SDP offer synthesis and answer folding for the bundled audio session.
//!
//! Offers describe every SSRC the client has ever announced, one `m=audio`
//! section per SSRC, multiplexed over the local bundle. Remote slot labels
//! (`mid`) are assigned once and kept for the lifetime of the session; the
//! `audio0` slot always carries the current local source.

use std::str::FromStr;

use serde_json::{json, Map};
use thiserror::Error;

use crate::conference::{
    Candidate, ChannelBundle, ConferenceDescription, Fingerprint, IceCredentials, PayloadType,
    RtcpFeedback, RtpHdrExt, Transport,
};

pub const OPUS_PAYLOAD_TYPE: u32 = 111;
pub const TELEPHONE_EVENT_PAYLOAD_TYPE: u32 = 126;
/// `mid` of the section carrying the local source and the transport attributes.
pub const MAIN_SLOT_LABEL: &str = "audio0";

pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const TRANSPORT_CC_URI: &str =
    "http://www.webrtc.org/experiments/rtp-hdrext/transport-wide-cc-02";

const ANSWER_SETUP_ROLE: &str = "active";
const PRIVATE_ADDRESS_PREFIX: &str = "192.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    #[error("no channel found for local endpoint '{endpoint}'")]
    LocalChannelMissing { endpoint: String },
    #[error("local channel must carry exactly one source, found {count}")]
    UnexpectedLocalSources { count: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnswerError {
    #[error("no channel found for local endpoint '{endpoint}'")]
    LocalChannelMissing { endpoint: String },
    #[error("SDP answer has no a=ice-ufrag line")]
    MissingIceUfrag,
    #[error("SDP answer has no a=ice-pwd line")]
    MissingIcePwd,
}

/// Ledger of every SSRC announced so far, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferState {
    pub items: Vec<OfferSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferSlot {
    pub ssrc: u32,
    pub label: String,
    pub is_removed: bool,
}

impl OfferState {
    /// Number of participants currently present, the local one included.
    pub fn active_count(&self) -> usize {
        self.items.iter().filter(|item| !item.is_removed).count()
    }

    pub fn slot(&self, ssrc: u32) -> Option<&OfferSlot> {
        self.items.iter().find(|item| item.ssrc == ssrc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOffer {
    pub sdp_list: Vec<String>,
    /// Always `false`: only full offers are generated.
    pub is_partial: bool,
    pub state: OfferState,
}

/// Inputs that stay fixed for one negotiated session.
#[derive(Debug, Clone, Copy)]
pub struct OfferContext<'a> {
    pub session_id: u32,
    pub local_bundle_id: &'a str,
    pub bridge_host: &'a str,
    pub transport: &'a Transport,
}

struct Slot {
    ssrc: u32,
    label: String,
    is_main: bool,
    is_removed: bool,
}

pub fn build_offer(
    conference: &ConferenceDescription,
    context: &OfferContext<'_>,
    prior: Option<&OfferState>,
) -> Result<RemoteOffer, OfferError> {
    let mut current = Vec::new();
    let mut main_ssrc = None;
    for channel in conference.channels() {
        if channel.endpoint == context.local_bundle_id {
            match channel.sources.as_slice() {
                [ssrc] => {
                    main_ssrc = Some(*ssrc);
                    current.push(*ssrc);
                }
                other => {
                    return Err(OfferError::UnexpectedLocalSources { count: other.len() });
                }
            }
        } else if let Some(ssrc) = channel.ssrcs.first() {
            current.push(*ssrc);
        }
    }

    let main_ssrc = main_ssrc.ok_or_else(|| OfferError::LocalChannelMissing {
        endpoint: context.local_bundle_id.to_owned(),
    })?;

    // The main slot follows the local source even when the answer replaces it.
    let mut slots: Vec<Slot> = prior
        .map(|state| {
            state
                .items
                .iter()
                .filter_map(|item| {
                    if item.label == MAIN_SLOT_LABEL {
                        return Some(Slot {
                            ssrc: main_ssrc,
                            label: item.label.clone(),
                            is_main: true,
                            is_removed: false,
                        });
                    }
                    if item.ssrc == main_ssrc {
                        return None;
                    }
                    Some(Slot {
                        ssrc: item.ssrc,
                        label: item.label.clone(),
                        is_main: false,
                        is_removed: !current.contains(&item.ssrc),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    for ssrc in current {
        if slots.iter().any(|slot| slot.ssrc == ssrc) {
            continue;
        }
        let is_main = ssrc == main_ssrc;
        let label = if is_main && !slots.iter().any(|slot| slot.label == MAIN_SLOT_LABEL) {
            MAIN_SLOT_LABEL.to_owned()
        } else {
            format!("stream{ssrc}")
        };
        slots.push(Slot {
            ssrc,
            label,
            is_main,
            is_removed: false,
        });
    }

    let sdp = render_offer(&slots, context);
    Ok(RemoteOffer {
        sdp_list: vec![sdp],
        is_partial: false,
        state: OfferState {
            items: slots
                .into_iter()
                .map(|slot| OfferSlot {
                    ssrc: slot.ssrc,
                    label: slot.label,
                    is_removed: slot.is_removed,
                })
                .collect(),
        },
    })
}

fn render_offer(slots: &[Slot], context: &OfferContext<'_>) -> String {
    let mut lines = vec![
        "v=0".to_owned(),
        format!("o=- {} 2 IN IP4 0.0.0.0", context.session_id),
        "s=-".to_owned(),
        "t=0 0".to_owned(),
        format!(
            "a=group:BUNDLE {}",
            slots
                .iter()
                .map(|slot| slot.label.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        "a=ice-lite".to_owned(),
    ];

    for slot in slots {
        lines.push(format!(
            "m=audio {} RTP/SAVPF {OPUS_PAYLOAD_TYPE} {TELEPHONE_EVENT_PAYLOAD_TYPE}",
            if slot.is_main { 1 } else { 0 }
        ));
        if slot.is_main {
            lines.push("c=IN IP4 0.0.0.0".to_owned());
        }
        lines.push(format!("a=mid:{}", slot.label));
        if slot.is_removed {
            lines.push("a=inactive".to_owned());
            continue;
        }

        if slot.is_main {
            push_transport(&mut lines, context);
        }

        lines.push(format!("a=rtpmap:{OPUS_PAYLOAD_TYPE} opus/48000/2"));
        lines.push(format!(
            "a=rtpmap:{TELEPHONE_EVENT_PAYLOAD_TYPE} telephone-event/8000"
        ));
        lines.push(format!(
            "a=fmtp:{OPUS_PAYLOAD_TYPE} minptime=10; useinbandfec=1; usedtx=1"
        ));
        lines.push("a=rtcp:1 IN IP4 0.0.0.0".to_owned());
        lines.push("a=rtcp-mux".to_owned());
        for ext in audio_header_extensions() {
            lines.push(format!("a=extmap:{} {}", ext.id, ext.uri));
        }
        lines.push(format!("a=rtcp-fb:{OPUS_PAYLOAD_TYPE} transport-cc"));

        if slot.is_main {
            lines.push("a=sendrecv".to_owned());
        } else {
            lines.push("a=sendonly".to_owned());
            lines.push("a=bundle-only".to_owned());
        }

        let ssrc = slot.ssrc;
        lines.push(format!("a=ssrc-group:FID {ssrc}"));
        lines.push(format!("a=ssrc:{ssrc} cname:stream{ssrc}"));
        lines.push(format!("a=ssrc:{ssrc} msid:stream{ssrc} audio{ssrc}"));
        lines.push(format!("a=ssrc:{ssrc} mslabel:audio{ssrc}"));
        lines.push(format!("a=ssrc:{ssrc} label:audio{ssrc}"));
    }

    let mut sdp = lines.join("\n");
    sdp.push('\n');
    sdp
}

fn push_transport(lines: &mut Vec<String>, context: &OfferContext<'_>) {
    if let Some(credentials) = &context.transport.credentials {
        lines.push(format!("a=ice-ufrag:{}", credentials.ufrag));
        lines.push(format!("a=ice-pwd:{}", credentials.pwd));
    }
    for fingerprint in &context.transport.fingerprints {
        lines.push(format!(
            "a=fingerprint:{} {}",
            fingerprint.hash, fingerprint.fingerprint
        ));
        lines.push(format!("a=setup:{}", fingerprint.setup));
    }
    lines.extend(
        context
            .transport
            .candidates
            .iter()
            .filter_map(|candidate| candidate_line(candidate, context.bridge_host)),
    );
}

/// Renders one `a=candidate:` line, or `None` for TCP candidates lacking a tcptype.
fn candidate_line(candidate: &Candidate, bridge_host: &str) -> Option<String> {
    let protocol = match candidate.protocol.as_str() {
        "ssltcp" => "tcp",
        other => other,
    };
    // The bridge reports its LAN address; clients must reach the public host.
    let ip = if candidate.ip.starts_with(PRIVATE_ADDRESS_PREFIX) {
        bridge_host
    } else {
        candidate.ip.as_str()
    };

    let mut line = format!(
        "a=candidate:{} {} {} {} {} {} typ {}",
        candidate.foundation,
        candidate.component,
        protocol,
        candidate.priority,
        ip,
        candidate.port,
        candidate.kind
    );

    if candidate.kind.has_related_address() {
        if let (Some(addr), Some(port)) = (&candidate.rel_addr, candidate.rel_port) {
            line.push_str(&format!(" raddr {addr} rport {port}"));
        }
    }

    if protocol == "tcp" {
        let Some(tcp_type) = candidate.tcp_type.as_deref() else {
            tracing::trace!(candidate = %candidate.id, "skipping tcp candidate without tcptype");
            return None;
        };
        line.push_str(&format!(" tcptype {tcp_type}"));
    }

    line.push_str(&format!(" generation {}", candidate.generation));
    Some(line)
}

/// Codecs announced for the local channel. This is policy, not negotiated.
pub fn audio_payload_types() -> Vec<PayloadType> {
    let mut opus_parameters = Map::new();
    opus_parameters.insert("fmtp".into(), json!(["minptime=10;useinbandfec=1"]));
    opus_parameters.insert("rtcp-fbs".into(), json!([{ "type": "transport-cc" }]));

    vec![
        PayloadType {
            id: OPUS_PAYLOAD_TYPE,
            name: "opus".into(),
            clockrate: 48000,
            channels: 2,
            parameters: Some(opus_parameters),
            rtcp_fbs: vec![RtcpFeedback::transport_cc()],
        },
        PayloadType {
            id: TELEPHONE_EVENT_PAYLOAD_TYPE,
            name: "telephone-event".into(),
            clockrate: 8000,
            channels: 1,
            parameters: None,
            rtcp_fbs: vec![RtcpFeedback::transport_cc()],
        },
    ]
}

pub fn audio_header_extensions() -> Vec<RtpHdrExt> {
    vec![
        RtpHdrExt {
            id: 1,
            uri: AUDIO_LEVEL_URI.into(),
        },
        RtpHdrExt {
            id: 3,
            uri: ABS_SEND_TIME_URI.into(),
        },
        RtpHdrExt {
            id: 5,
            uri: TRANSPORT_CC_URI.into(),
        },
    ]
}

/// The parts of a media-engine answer the bridge needs to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpAnswer {
    pub sources: Vec<u32>,
    pub credentials: IceCredentials,
    pub fingerprints: Vec<Fingerprint>,
}

impl SdpAnswer {
    pub fn parse(text: &str) -> Result<Self, AnswerError> {
        let mut sources = Vec::new();
        let mut ufrag = None;
        let mut pwd = None;
        let mut fingerprints = Vec::new();

        for line in text.lines() {
            if let Some(value) = line.strip_prefix("a=ssrc:") {
                if let Some(ssrc) = leading_ssrc(value) {
                    if !sources.contains(&ssrc) {
                        sources.push(ssrc);
                    }
                }
            } else if let Some(value) = line.strip_prefix("a=ice-ufrag:") {
                let value = value.trim();
                if !value.is_empty() {
                    ufrag.get_or_insert_with(|| value.to_owned());
                }
            } else if let Some(value) = line.strip_prefix("a=ice-pwd:") {
                let value = value.trim();
                if !value.is_empty() {
                    pwd.get_or_insert_with(|| value.to_owned());
                }
            } else if let Some(value) = line.strip_prefix("a=fingerprint:") {
                let mut tokens = value.split_whitespace();
                if let (Some(hash), Some(fingerprint), None) =
                    (tokens.next(), tokens.next(), tokens.next())
                {
                    fingerprints.push(Fingerprint {
                        hash: hash.to_owned(),
                        fingerprint: fingerprint.to_owned(),
                        setup: ANSWER_SETUP_ROLE.to_owned(),
                    });
                }
            }
        }

        Ok(Self {
            sources,
            credentials: IceCredentials {
                ufrag: ufrag.ok_or(AnswerError::MissingIceUfrag)?,
                pwd: pwd.ok_or(AnswerError::MissingIcePwd)?,
            },
            fingerprints,
        })
    }

    /// Returns a copy of `conference` with the local channel and bundle
    /// transport updated from this answer.
    pub fn apply_to(
        &self,
        conference: &ConferenceDescription,
        local_bundle_id: &str,
    ) -> Result<ConferenceDescription, AnswerError> {
        let mut updated = conference.clone();
        let channel = updated
            .contents
            .iter_mut()
            .flat_map(|content| content.channels.iter_mut())
            .find(|channel| channel.endpoint == local_bundle_id)
            .ok_or_else(|| AnswerError::LocalChannelMissing {
                endpoint: local_bundle_id.to_owned(),
            })?;

        channel.sources = self.sources.clone();
        channel.payload_types = audio_payload_types();
        channel.rtp_hdr_exts = audio_header_extensions();

        let transport = Transport {
            credentials: Some(self.credentials.clone()),
            fingerprints: self.fingerprints.clone(),
            candidates: Vec::new(),
        };
        match updated
            .channel_bundles
            .iter_mut()
            .find(|bundle| bundle.id == local_bundle_id)
        {
            Some(bundle) => bundle.transport = transport,
            None => updated.channel_bundles.push(ChannelBundle {
                id: local_bundle_id.to_owned(),
                transport,
            }),
        }

        Ok(updated)
    }
}

impl FromStr for SdpAnswer {
    type Err = AnswerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SdpAnswer::parse(s)
    }
}

fn leading_ssrc(value: &str) -> Option<u32> {
    let value = value.trim_start();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// Folds an SDP answer into `conference`. Nothing is modified on failure.
pub fn apply_answer(
    conference: &ConferenceDescription,
    local_bundle_id: &str,
    answer: &str,
) -> Result<ConferenceDescription, AnswerError> {
    SdpAnswer::parse(answer)?.apply_to(conference, local_bundle_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conference::{CandidateType, Channel, Content, AUDIO_CONTENT};

    const LOCAL: &str = "local-bundle";

    fn remote_channel(endpoint: &str, ssrc: u32) -> Channel {
        Channel {
            id: Some(format!("ch-{endpoint}")),
            ssrcs: vec![ssrc],
            ..Channel::local_audio(endpoint)
        }
    }

    fn local_channel(ssrc: u32) -> Channel {
        Channel {
            id: Some("ch-local".into()),
            sources: vec![ssrc],
            ..Channel::local_audio(LOCAL)
        }
    }

    fn conference(channels: Vec<Channel>) -> ConferenceDescription {
        ConferenceDescription {
            id: "conf".into(),
            channel_bundles: Vec::new(),
            contents: vec![Content {
                name: AUDIO_CONTENT.into(),
                channels,
            }],
        }
    }

    fn candidate(ip: &str, protocol: &str, kind: CandidateType) -> Candidate {
        Candidate {
            id: format!("cand-{ip}"),
            generation: 0,
            component: "1".into(),
            protocol: protocol.into(),
            tcp_type: None,
            ip: ip.into(),
            port: 10000,
            foundation: "1".into(),
            priority: 2_130_706_431,
            kind,
            network: 0,
            rel_addr: None,
            rel_port: None,
        }
    }

    fn transport(candidates: Vec<Candidate>) -> Transport {
        Transport {
            credentials: Some(IceCredentials {
                ufrag: "bridge-ufrag".into(),
                pwd: "bridge-pwd".into(),
            }),
            fingerprints: vec![Fingerprint {
                hash: "sha-256".into(),
                fingerprint: "AA:BB".into(),
                setup: "actpass".into(),
            }],
            candidates,
        }
    }

    fn offer(
        conference: &ConferenceDescription,
        transport: &Transport,
        prior: Option<&OfferState>,
    ) -> Result<RemoteOffer, OfferError> {
        let context = OfferContext {
            session_id: 42,
            local_bundle_id: LOCAL,
            bridge_host: "bridge.example.org",
            transport,
        };
        build_offer(conference, &context, prior)
    }

    fn labels(state: &OfferState) -> Vec<(u32, &str)> {
        state
            .items
            .iter()
            .map(|item| (item.ssrc, item.label.as_str()))
            .collect()
    }

    #[test]
    fn offer_announces_local_and_remote_sources() {
        let conference = conference(vec![
            remote_channel("a", 2000),
            local_channel(1000),
            remote_channel("b", 3000),
        ]);
        let offer = offer(&conference, &transport(Vec::new()), None).expect("offer");

        assert!(!offer.is_partial);
        assert_eq!(offer.sdp_list.len(), 1);
        assert_eq!(
            labels(&offer.state),
            vec![(2000, "stream2000"), (1000, "audio0"), (3000, "stream3000")]
        );
        assert_eq!(offer.state.active_count(), 3);

        let sdp = &offer.sdp_list[0];
        assert!(sdp.starts_with("v=0\no=- 42 2 IN IP4 0.0.0.0\ns=-\nt=0 0\n"));
        assert!(sdp.contains("a=group:BUNDLE stream2000 audio0 stream3000\n"));
        assert!(sdp.contains("m=audio 1 RTP/SAVPF 111 126\nc=IN IP4 0.0.0.0\na=mid:audio0\n"));
        assert!(sdp.contains("m=audio 0 RTP/SAVPF 111 126\na=mid:stream2000\n"));
        assert!(sdp.contains("a=ice-ufrag:bridge-ufrag\na=ice-pwd:bridge-pwd\n"));
        assert!(sdp.contains("a=fingerprint:sha-256 AA:BB\na=setup:actpass\n"));
        assert!(sdp.contains("a=rtpmap:111 opus/48000/2\n"));
        assert!(sdp.contains("a=rtpmap:126 telephone-event/8000\n"));
        assert!(sdp.contains("a=sendonly\na=bundle-only\na=ssrc-group:FID 2000\n"));
        assert!(sdp.contains("a=sendrecv\na=ssrc-group:FID 1000\n"));
        assert!(sdp.contains("a=ssrc:1000 msid:stream1000 audio1000\n"));
        assert_eq!(sdp.matches("a=ice-ufrag:").count(), 1);
        assert!(sdp.ends_with("label:audio3000\n"));
    }

    #[test]
    fn offer_slots_are_stable_across_regeneration() {
        let conference = conference(vec![local_channel(1000), remote_channel("a", 2000)]);
        let transport = transport(Vec::new());
        let first = offer(&conference, &transport, None).expect("first");

        let second = offer(&conference, &transport, Some(&first.state)).expect("second");
        let third = offer(&conference, &transport, Some(&first.state)).expect("third");

        assert_eq!(second.state, first.state);
        assert_eq!(third.state, second.state);
        assert_eq!(second.sdp_list, third.sdp_list);
    }

    #[test]
    fn departed_sources_keep_their_slot_and_go_inactive() {
        let transport = transport(Vec::new());
        let before = conference(vec![
            local_channel(1000),
            remote_channel("a", 2000),
            remote_channel("b", 3000),
        ]);
        let first = offer(&before, &transport, None).expect("first");

        let after = conference(vec![
            local_channel(1000),
            remote_channel("b", 3000),
            remote_channel("c", 4000),
        ]);
        let second = offer(&after, &transport, Some(&first.state)).expect("second");

        assert_eq!(
            labels(&second.state),
            vec![
                (1000, "audio0"),
                (2000, "stream2000"),
                (3000, "stream3000"),
                (4000, "stream4000")
            ]
        );
        assert_eq!(second.state.slot(2000).map(|s| s.is_removed), Some(true));
        assert_eq!(second.state.active_count(), 3);

        let sdp = &second.sdp_list[0];
        assert!(sdp.contains("a=mid:stream2000\na=inactive\nm=audio"));
        assert!(!sdp.contains("a=ssrc:2000"));
        assert!(sdp.contains("a=group:BUNDLE audio0 stream2000 stream3000 stream4000\n"));
    }

    #[test]
    fn returning_source_is_reactivated_in_its_old_slot() {
        let transport = transport(Vec::new());
        let with_remote = conference(vec![local_channel(1000), remote_channel("a", 2000)]);
        let alone = conference(vec![local_channel(1000)]);

        let first = offer(&with_remote, &transport, None).expect("first");
        let second = offer(&alone, &transport, Some(&first.state)).expect("second");
        let third = offer(&with_remote, &transport, Some(&second.state)).expect("third");

        assert_eq!(labels(&third.state), labels(&first.state));
        assert_eq!(third.state.active_count(), 2);
    }

    #[test]
    fn main_slot_follows_replaced_local_source() {
        let transport = transport(Vec::new());
        let allocated = conference(vec![local_channel(1001), remote_channel("a", 2000)]);
        let first = offer(&allocated, &transport, None).expect("first");

        let answered = conference(vec![local_channel(1111), remote_channel("a", 2000)]);
        let second = offer(&answered, &transport, Some(&first.state)).expect("second");

        assert_eq!(
            labels(&second.state),
            vec![(1111, "audio0"), (2000, "stream2000")]
        );
        assert_eq!(second.state.active_count(), 2);

        let sdp = &second.sdp_list[0];
        assert!(sdp.contains("a=group:BUNDLE audio0 stream2000\n"));
        assert!(sdp.contains("m=audio 1 RTP/SAVPF 111 126\nc=IN IP4 0.0.0.0\na=mid:audio0\n"));
        assert!(sdp.contains("a=sendrecv\na=ssrc-group:FID 1111\n"));
        assert!(!sdp.contains("a=inactive"));
        assert!(!sdp.contains("stream1111"));
        assert!(!sdp.contains("1001"));
    }

    #[test]
    fn stale_slot_for_new_local_source_is_folded_into_main() {
        let transport = transport(Vec::new());
        let prior = OfferState {
            items: vec![
                OfferSlot {
                    ssrc: 1001,
                    label: MAIN_SLOT_LABEL.into(),
                    is_removed: false,
                },
                OfferSlot {
                    ssrc: 1111,
                    label: "stream1111".into(),
                    is_removed: false,
                },
            ],
        };

        let answered = conference(vec![local_channel(1111)]);
        let next = offer(&answered, &transport, Some(&prior)).expect("offer");

        assert_eq!(labels(&next.state), vec![(1111, "audio0")]);
        assert_eq!(next.state.active_count(), 1);
    }

    #[test]
    fn private_bridge_addresses_are_rewritten() {
        let conference = conference(vec![local_channel(1000)]);
        let transport = transport(vec![
            candidate("192.168.1.5", "udp", CandidateType::Host),
            candidate("198.51.100.7", "udp", CandidateType::Host),
        ]);
        let sdp = offer(&conference, &transport, None).expect("offer").sdp_list[0].clone();

        assert!(sdp.contains(
            "a=candidate:1 1 udp 2130706431 bridge.example.org 10000 typ host generation 0\n"
        ));
        assert!(sdp.contains(
            "a=candidate:1 1 udp 2130706431 198.51.100.7 10000 typ host generation 0\n"
        ));
        assert!(!sdp.contains("192.168.1.5"));
    }

    #[test]
    fn tcp_candidates_need_a_tcptype() {
        let conference = conference(vec![local_channel(1000)]);
        let mut passive = candidate("198.51.100.8", "ssltcp", CandidateType::Host);
        passive.tcp_type = Some("passive".into());
        let transport = transport(vec![
            candidate("198.51.100.7", "tcp", CandidateType::Host),
            passive,
        ]);
        let sdp = offer(&conference, &transport, None).expect("offer").sdp_list[0].clone();

        assert!(!sdp.contains("198.51.100.7"));
        assert!(sdp.contains("tcp 2130706431 198.51.100.8 10000 typ host tcptype passive generation 0"));
    }

    #[test]
    fn reflexive_candidates_carry_related_address() {
        let conference = conference(vec![local_channel(1000)]);
        let mut srflx = candidate("203.0.113.4", "udp", CandidateType::Srflx);
        srflx.rel_addr = Some("10.0.0.4".into());
        srflx.rel_port = Some(5000);
        let sdp = offer(&conference, &transport(vec![srflx]), None).expect("offer").sdp_list[0]
            .clone();

        assert!(sdp.contains("typ srflx raddr 10.0.0.4 rport 5000 generation 0"));
    }

    #[test]
    fn offer_requires_exactly_one_local_source() {
        let transport = transport(Vec::new());
        let missing = conference(vec![remote_channel("a", 2000)]);
        assert_eq!(
            offer(&missing, &transport, None).unwrap_err(),
            OfferError::LocalChannelMissing {
                endpoint: LOCAL.into()
            }
        );

        let mut doubled = local_channel(1000);
        doubled.sources.push(1001);
        assert_eq!(
            offer(&conference(vec![doubled]), &transport, None).unwrap_err(),
            OfferError::UnexpectedLocalSources { count: 2 }
        );
    }

    const ANSWER: &str = "v=0\r\n\
        o=- 1 2 IN IP4 127.0.0.1\r\n\
        a=ice-ufrag:abc\r\n\
        a=ice-pwd:xyz\r\n\
        a=ice-ufrag:ignored\r\n\
        a=fingerprint:sha-256 AA:BB:CC\r\n\
        a=fingerprint:broken\r\n\
        a=ssrc:1111 cname:local\r\n\
        a=ssrc:1111 msid:local audio\r\n\
        a=ssrc:2222 cname:local\r\n";

    #[test]
    fn answer_updates_local_channel_and_transport() {
        let conference = conference(vec![remote_channel("a", 2000), local_channel(1000)]);
        let updated = apply_answer(&conference, LOCAL, ANSWER).expect("applies");

        let local = updated.local_channel(LOCAL).expect("local channel");
        assert_eq!(local.sources, vec![1111, 2222]);
        assert_eq!(local.payload_types, audio_payload_types());
        assert_eq!(local.rtp_hdr_exts, audio_header_extensions());

        let transport = updated.bundle_transport(LOCAL).expect("bundle added");
        assert_eq!(
            transport.credentials,
            Some(IceCredentials {
                ufrag: "abc".into(),
                pwd: "xyz".into()
            })
        );
        assert_eq!(transport.fingerprints.len(), 1);
        assert_eq!(transport.fingerprints[0].hash, "sha-256");
        assert_eq!(transport.fingerprints[0].fingerprint, "AA:BB:CC");
        assert_eq!(transport.fingerprints[0].setup, "active");
        assert!(transport.candidates.is_empty());

        assert_eq!(
            updated.local_channel("a"),
            conference.local_channel("a"),
            "remote channels are untouched"
        );
    }

    #[test]
    fn answer_replaces_existing_bundle_transport() {
        let mut conference = conference(vec![local_channel(1000)]);
        conference.channel_bundles.push(ChannelBundle {
            id: LOCAL.into(),
            transport: transport(vec![candidate("198.51.100.7", "udp", CandidateType::Host)]),
        });

        let updated = apply_answer(&conference, LOCAL, ANSWER).expect("applies");
        assert_eq!(updated.channel_bundles.len(), 1);
        assert!(updated.channel_bundles[0].transport.candidates.is_empty());
    }

    #[test]
    fn answer_without_credentials_is_rejected() {
        let conference = conference(vec![local_channel(1000)]);

        let no_ufrag = "a=ice-pwd:xyz\na=ssrc:1111 cname:x\n";
        assert_eq!(
            apply_answer(&conference, LOCAL, no_ufrag).unwrap_err(),
            AnswerError::MissingIceUfrag
        );

        let no_pwd = "a=ice-ufrag:abc\na=ssrc:1111 cname:x\n";
        assert_eq!(
            apply_answer(&conference, LOCAL, no_pwd).unwrap_err(),
            AnswerError::MissingIcePwd
        );
    }

    #[test]
    fn empty_answer_credentials_count_as_missing() {
        let conference = conference(vec![local_channel(1000)]);

        let empty_ufrag = "a=ice-ufrag:\na=ice-pwd:xyz\na=ssrc:1111 cname:x\n";
        assert_eq!(
            apply_answer(&conference, LOCAL, empty_ufrag).unwrap_err(),
            AnswerError::MissingIceUfrag
        );

        let blank_pwd = "a=ice-ufrag:abc\na=ice-pwd:  \na=ssrc:1111 cname:x\n";
        assert_eq!(
            apply_answer(&conference, LOCAL, blank_pwd).unwrap_err(),
            AnswerError::MissingIcePwd
        );

        let later_value = "a=ice-ufrag:\na=ice-ufrag:abc\na=ice-pwd:xyz\n";
        let answer = SdpAnswer::parse(later_value).expect("answer");
        assert_eq!(answer.credentials.ufrag, "abc");
    }

    #[test]
    fn answer_needs_a_local_channel() {
        let conference = conference(vec![remote_channel("a", 2000)]);
        assert_eq!(
            apply_answer(&conference, LOCAL, ANSWER).unwrap_err(),
            AnswerError::LocalChannelMissing {
                endpoint: LOCAL.into()
            }
        );
    }
}
