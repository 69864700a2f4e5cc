//! Client-side WebRTC session and signaling orchestrator
//!
//! This crate establishes, negotiates, monitors and recovers real-time
//! peer media sessions (publish, play, peer-to-peer, conference rooms)
//! over one persistent signaling connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SignalingOrchestrator                                   │
//! │  ├─ SignalingChannel (WebSocket JSON commands)           │
//! │  ├─ PeerSession registry (per-stream SDP state machine,  │
//! │  │   candidate buffering, cached replay commands)        │
//! │  │   └─ PeerConnectionEngine (webrtc-rs)                 │
//! │  ├─ ReconnectionSupervisor (global debounced recovery)   │
//! │  ├─ DataChannelMessenger (chunked message protocol)      │
//! │  └─ StatsAggregator (delta-based bitrate/fps snapshots)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! All work runs as reactions to three event sources: inbound signaling
//! messages, negotiation engine callbacks and timers, funneled through a
//! single dispatch task. Sessions negotiate independently; within one
//! session, candidate application is always ordered after the remote
//! description is accepted.
//!
//! # Example
//!
//! ```no_run
//! use peerstream_webrtc::{AdaptorConfig, PublishParams, SignalingOrchestrator};
//!
//! # async fn example() -> peerstream_webrtc::Result<()> {
//! let config = AdaptorConfig::new("wss://media.example.com/app/websocket");
//! let orchestrator = SignalingOrchestrator::connect(config).await?;
//!
//! orchestrator.add_listener(|event| {
//!     println!("event: {}", event.name());
//! });
//!
//! orchestrator.publish(PublishParams::new("my-stream")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod protocol;
pub mod reconnect;
pub mod signaling;
pub mod stats;

pub use config::{AdaptorConfig, IceServer, IceServerConfig};
pub use error::{Error, Result};
pub use events::{DataPayload, EventBus, StreamError, StreamEvent, TrackInfo};
pub use media::{MediaProvider, StaticMediaProvider, TrackFlags};
pub use orchestrator::SignalingOrchestrator;
pub use peer::{
    IceCandidate, IceConnectionState, PeerConnectionEngine, SdpStatus, SdpType,
    SessionDescription, SessionRole, SignalingState,
};
pub use protocol::{Command, PlayParams, PublishParams, ServerMessage};
pub use stats::{StatsAggregator, StatsSample, StreamStats};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
