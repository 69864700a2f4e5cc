//! Negotiation engine abstraction
//!
//! The native peer-connection capability consumed by the orchestrator:
//! offer/answer creation, description and candidate application, data
//! channels, stats and connection-state access. Engine callbacks are
//! delivered as [`EngineEvent`]s over the sender supplied at creation, so
//! the orchestrator observes every engine through one event stream.

use crate::events::TrackInfo;
use crate::stats::StatsSample;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// ICE connection state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
    Unspecified,
}

impl IceConnectionState {
    /// States in which a session must not be torn down by recovery
    pub fn is_alive(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Checking
                | IceConnectionState::Connected
                | IceConnectionState::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
            IceConnectionState::Unspecified => "unspecified",
        }
    }
}

/// Signaling state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
    Unspecified,
}

/// SDP type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(SdpType::Offer),
            "answer" => Some(SdpType::Answer),
            _ => None,
        }
    }
}

/// One session description (SDP) exchanged during negotiation
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp,
        }
    }
}

/// One ICE candidate, local or remote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IceCandidate {
    /// Candidate line; empty for the end-of-candidates marker
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    /// Transport, when the engine reports it ("udp", "tcp")
    pub protocol: Option<String>,
}

impl IceCandidate {
    /// End-of-candidates marker
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate.is_empty()
    }
}

/// Role of a session, which decides who opens the data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Local side publishes media; it opens the data channel
    Publish,
    /// Remote side publishes; the server opens the data channel
    Play,
    /// Peer-to-peer; both sides may open a channel
    Peer,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Publish => "publish",
            SessionRole::Play => "play",
            SessionRole::Peer => "peer",
        }
    }
}

/// Events emitted by a negotiation engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A local ICE candidate was gathered (empty candidate text marks the
    /// end of gathering)
    IceCandidate {
        stream_id: String,
        candidate: IceCandidate,
    },
    /// ICE connection state changed
    IceConnectionStateChange {
        stream_id: String,
        state: IceConnectionState,
    },
    /// A remote media track was added
    Track {
        stream_id: String,
        track: TrackInfo,
    },
    /// The remote side opened a data channel
    DataChannel {
        stream_id: String,
        channel: Arc<dyn DataChannelHandle>,
    },
    /// A data channel reached the open state
    DataChannelOpen { stream_id: String },
    /// A data channel closed
    DataChannelClose { stream_id: String },
    /// A data channel reported an error
    DataChannelError { stream_id: String, message: String },
    /// One inbound data-channel frame
    DataChannelMessage {
        stream_id: String,
        is_text: bool,
        data: Vec<u8>,
    },
}

/// Handle to one data channel
#[async_trait]
pub trait DataChannelHandle: Send + Sync + std::fmt::Debug {
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<()>;

    async fn send_binary(&self, data: &[u8]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// The negotiation engine consumed by the orchestrator
#[async_trait]
pub trait PeerConnectionEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Open a local data channel on this connection
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>>;

    /// Kinds ("audio"/"video") of the local senders currently attached
    async fn sender_kinds(&self) -> Vec<String>;

    /// Raw per-sample statistics for the stats aggregator
    async fn get_stats(&self) -> Result<Vec<StatsSample>>;

    fn ice_connection_state(&self) -> IceConnectionState;

    fn signaling_state(&self) -> SignalingState;

    async fn close(&self) -> Result<()>;
}

/// Creates one engine per stream id
///
/// The orchestrator passes the ICE-server set current at creation time, so
/// a server-pushed update affects subsequently created sessions only.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create_engine(
        &self,
        stream_id: &str,
        role: SessionRole,
        ice_servers: Vec<crate::config::IceServer>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn PeerConnectionEngine>>;
}
