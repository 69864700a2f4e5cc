//! Peer negotiation: engine contract, webrtc-rs adapter and the
//! per-stream session state machine

mod engine;
mod rtc;
mod session;

pub use engine::{
    DataChannelHandle, EngineEvent, EngineFactory, IceCandidate, IceConnectionState,
    PeerConnectionEngine, SdpType, SessionDescription, SessionRole, SignalingState,
};
pub use rtc::{RtcEngine, RtcEngineFactory};
pub use session::{
    is_candidate_allowed, CandidateDisposition, PeerSession, ReplayCommand, SdpStatus,
};
