//! Configuration types for the signaling orchestrator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default STUN server used when the caller provides no ICE servers
pub const DEFAULT_STUN_SERVER: &str = "stun:stun1.l.google.com:19302";

/// Main configuration for the orchestrator
///
/// Built once and shared by reference into every component. The only
/// runtime-mutable piece of ICE configuration lives in [`IceServerConfig`],
/// which the server may replace over the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptorConfig {
    /// WebSocket signaling URL (ws:// or wss://)
    pub websocket_url: String,

    /// ICE servers used when creating peer connections
    pub ice_servers: Vec<IceServer>,

    /// Whether `ice_servers` was provided by the caller. When false, the
    /// server is asked for its ICE configuration after connecting.
    pub user_defined_ice_servers: bool,

    /// Allowed candidate transports, for both directions
    pub candidate_transports: Vec<String>,

    /// Whether data channels are negotiated at all
    pub data_channel_enabled: bool,

    /// Broadcast data only: no audio/video is ever attached
    pub only_data_channel: bool,

    /// Play-only instance: no local media is required
    pub is_play_mode: bool,

    /// Allow multiple peers to join this peer-to-peer session; the server
    /// assigns fresh stream ids via `connectWithNewId`
    pub multi_peer: bool,

    /// Whether failed sessions are recovered automatically
    pub reconnect_if_required: bool,

    /// Degradation preference applied to video senders
    pub degradation_preference: String,

    /// Keepalive ping period on the signaling channel
    pub ping_period: Duration,

    /// Default period for the per-session stats sampler
    pub stats_period: Duration,
}

/// One STUN or TURN server entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: String,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn stun(urls: &str) -> Self {
        Self {
            urls: urls.to_string(),
            ..Default::default()
        }
    }

    pub fn turn(urls: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: urls.to_string(),
            username: username.to_string(),
            credential: credential.to_string(),
        }
    }
}

/// ICE server set actually used when creating engines
///
/// Initialized from [`AdaptorConfig::ice_servers`]; replaced in place when
/// the server pushes an `iceServerConfig` message. Sessions created before
/// the push keep the configuration they were built with.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub servers: Vec<IceServer>,
}

impl IceServerConfig {
    /// Apply a server-pushed ICE configuration.
    ///
    /// A `turn:` URI is appended after the default STUN server with its
    /// credentials; a `stun:` URI replaces the list.
    pub fn apply_server_push(
        &mut self,
        uri: &str,
        username: Option<&str>,
        credential: Option<&str>,
    ) {
        if uri.starts_with("turn:") {
            self.servers = vec![
                IceServer::stun(DEFAULT_STUN_SERVER),
                IceServer::turn(uri, username.unwrap_or(""), credential.unwrap_or("")),
            ];
        } else if uri.starts_with("stun:") {
            self.servers = vec![IceServer::stun(uri)];
        }
    }
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            websocket_url: "ws://localhost:5080/app/websocket".to_string(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            user_defined_ice_servers: false,
            candidate_transports: vec!["udp".to_string(), "tcp".to_string()],
            data_channel_enabled: true,
            only_data_channel: false,
            is_play_mode: false,
            multi_peer: false,
            reconnect_if_required: true,
            degradation_preference: "maintain-resolution".to_string(),
            ping_period: Duration::from_secs(3),
            stats_period: Duration::from_secs(5),
        }
    }
}

impl AdaptorConfig {
    /// Create a configuration for the given signaling URL
    pub fn new(websocket_url: &str) -> Self {
        Self {
            websocket_url: websocket_url.to_string(),
            ..Default::default()
        }
    }

    /// Provide caller-defined ICE servers, disabling the server-side lookup
    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self.user_defined_ice_servers = true;
        self
    }

    /// Mark this instance as play-only (no local media expected)
    pub fn play_only(mut self) -> Self {
        self.is_play_mode = true;
        self
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the websocket URL is not a ws:// or wss:// URL,
    /// no ICE server is configured, or the candidate allow-list is empty.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.websocket_url.starts_with("ws://") && !self.websocket_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "websocket_url must start with ws:// or wss://, got {}",
                self.websocket_url
            )));
        }

        if self.ice_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one ICE server is required".to_string(),
            ));
        }

        if self.candidate_transports.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one candidate transport must be allowed".to_string(),
            ));
        }

        Ok(())
    }

    /// The ICE server set used for the first engines created
    pub fn initial_ice_config(&self) -> IceServerConfig {
        IceServerConfig {
            servers: self.ice_servers.clone(),
        }
    }
}
