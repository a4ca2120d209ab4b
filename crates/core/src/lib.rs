//! Conference model, Colibri wire format, and SDP synthesis for bridge-hosted group calls.

pub mod conference;
pub mod sdp;
mod wire;

pub use conference::{
    Candidate, CandidateType, Channel, ChannelBundle, ChannelPatch, ConferenceDescription,
    ConferenceParseError, ConferencePatch, Content, ContentPatch, Direction, Fingerprint,
    IceCredentials, PayloadType, RtcpFeedback, RtpHdrExt, SsrcGroup, Transport,
};
pub use sdp::{
    apply_answer, build_offer, AnswerError, OfferContext, OfferError, OfferSlot, OfferState,
    RemoteOffer, SdpAnswer,
};
