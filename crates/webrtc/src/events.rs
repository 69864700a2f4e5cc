//! Typed orchestrator events and the listener registry
//!
//! Every observable condition is one variant of [`StreamEvent`] or
//! [`StreamError`], published through a single notify path. `name()`
//! returns the stable string identifier that callers may log or switch on.

use crate::stats::StreamStats;
use serde_json::{Map, Value};

/// Remote media track descriptor, as reported by the negotiation engine
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track identifier from the remote SDP
    pub id: String,
    /// "audio" or "video"
    pub kind: String,
    /// Media-stream (msid) identifier the track belongs to
    pub stream_id: String,
}

/// Payload delivered over a data channel
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    Text(String),
    Binary(Vec<u8>),
}

impl DataPayload {
    pub fn len(&self) -> usize {
        match self {
            DataPayload::Text(t) => t.len(),
            DataPayload::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Events published by the orchestrator
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Signaling channel is connected and ready for commands
    Initialized,
    /// Signaling channel closed
    Closed,
    /// Keepalive acknowledged by the server
    Pong,
    /// Publish negotiation started for the stream (server sent `start`)
    PublishStarted { stream_id: String },
    /// A remote track became available on a playing/peer session
    NewTrackAvailable {
        stream_id: String,
        track: TrackInfo,
        /// Track id resolved through the server-provided id mapping
        assigned_track_id: Option<String>,
    },
    /// ICE connection state of one session changed
    IceConnectionStateChanged {
        stream_id: String,
        state: crate::peer::IceConnectionState,
    },
    /// Data channel for the stream is open
    DataChannelOpened { stream_id: String },
    /// Data channel for the stream closed
    DataChannelClosed { stream_id: String },
    /// A complete message arrived over the data channel
    DataReceived {
        stream_id: String,
        data: DataPayload,
    },
    /// Recovery is about to run for the publish session
    ReconnectionAttemptForPublisher { stream_id: String },
    /// Recovery is about to run for a play session
    ReconnectionAttemptForPlayer { stream_id: String },
    /// Fresh statistics snapshot for one session
    UpdatedStats(StreamStats),
    /// Server notification, forwarded verbatim
    Notification {
        definition: String,
        payload: Map<String, Value>,
    },
    /// Response to `getStreamInfo`
    StreamInformation { payload: Map<String, Value> },
    /// Response to `getRoomInfo`
    RoomInformation { payload: Map<String, Value> },
    /// Response to `getTrackList`
    TrackList { payload: Map<String, Value> },
    /// Peer-to-peer message relayed by the server
    PeerMessage { payload: Map<String, Value> },
    /// Server assigned a new stream id for the peer session
    ConnectWithNewId { stream_id: String },
}

impl StreamEvent {
    /// Stable identifier for logging and legacy callbacks
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Initialized => "initialized",
            StreamEvent::Closed => "closed",
            StreamEvent::Pong => "pong",
            StreamEvent::PublishStarted { .. } => "publish_started",
            StreamEvent::NewTrackAvailable { .. } => "newTrackAvailable",
            StreamEvent::IceConnectionStateChanged { .. } => "ice_connection_state_changed",
            StreamEvent::DataChannelOpened { .. } => "data_channel_opened",
            StreamEvent::DataChannelClosed { .. } => "data_channel_closed",
            StreamEvent::DataReceived { .. } => "data_received",
            StreamEvent::ReconnectionAttemptForPublisher { .. } => {
                "reconnection_attempt_for_publisher"
            }
            StreamEvent::ReconnectionAttemptForPlayer { .. } => "reconnection_attempt_for_player",
            StreamEvent::UpdatedStats(_) => "updated_stats",
            StreamEvent::Notification { .. } => "notification",
            StreamEvent::StreamInformation { .. } => "streamInformation",
            StreamEvent::RoomInformation { .. } => "roomInformation",
            StreamEvent::TrackList { .. } => "trackList",
            StreamEvent::PeerMessage { .. } => "peerMessageCommand",
            StreamEvent::ConnectWithNewId { .. } => "connectWithNewId",
        }
    }
}

/// Error conditions surfaced to listeners
#[derive(Debug, Clone)]
pub enum StreamError {
    /// Remote description rejected, typically codec incompatibility.
    /// Surfaced once; never retried automatically.
    NotSetRemoteDescription { stream_id: String },
    /// Candidate transport outside the allowed set; candidate dropped
    ProtocolNotSupported { candidate: String },
    /// Signaling channel is not connected
    WebSocketNotConnected,
    /// Data channel failure for one stream
    DataChannelError { stream_id: String, message: String },
    /// Named error reported by the server
    ServerError {
        definition: String,
        payload: Map<String, Value>,
    },
}

impl StreamError {
    /// Stable identifier for logging and legacy callbacks
    pub fn name(&self) -> &'static str {
        match self {
            StreamError::NotSetRemoteDescription { .. } => "notSetRemoteDescription",
            StreamError::ProtocolNotSupported { .. } => "protocol_not_supported",
            StreamError::WebSocketNotConnected => "WebSocketNotConnected",
            StreamError::DataChannelError { .. } => "data_channel_error",
            StreamError::ServerError { .. } => "server_error",
        }
    }
}

type EventListener = Box<dyn Fn(&StreamEvent) + Send + Sync>;
type ErrorListener = Box<dyn Fn(&StreamError) + Send + Sync>;

/// Listener registry with a single dispatch point
#[derive(Default)]
pub struct EventBus {
    listeners: parking_lot::RwLock<Vec<EventListener>>,
    error_listeners: parking_lot::RwLock<Vec<ErrorListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event listener
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    /// Register an error listener
    pub fn add_error_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.error_listeners.write().push(Box::new(listener));
    }

    /// Notify all event listeners
    pub fn notify(&self, event: &StreamEvent) {
        for listener in self.listeners.read().iter() {
            listener(event);
        }
    }

    /// Notify all error listeners
    pub fn notify_error(&self, error: &StreamError) {
        for listener in self.error_listeners.read().iter() {
            listener(error);
        }
    }
}
