//! Signaling wire protocol
//!
//! JSON command objects exchanged with the media server over the signaling
//! channel. Every frame is an object tagged by its `command` field with
//! camelCase payload fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Outbound command frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    Publish {
        stream_id: String,
        token: String,
        subscriber_id: String,
        subscriber_code: String,
        stream_name: String,
        main_track: String,
        video: bool,
        audio: bool,
        meta_data: String,
        role: String,
    },
    Play {
        stream_id: String,
        token: String,
        room: String,
        track_list: Vec<String>,
        subscriber_id: String,
        subscriber_name: String,
        subscriber_code: String,
        viewer_info: String,
        role: String,
        user_publish_id: String,
        disable_tracks_by_default: bool,
    },
    Stop {
        stream_id: String,
    },
    Join {
        stream_id: String,
        multi_peer: bool,
        mode: String,
    },
    Leave {
        stream_id: String,
    },
    JoinRoom {
        room: String,
        main_track: String,
        stream_id: String,
        mode: String,
        stream_name: String,
        role: String,
        metadata: String,
    },
    LeaveFromRoom {
        room: String,
        main_track: String,
        stream_id: String,
    },
    TakeCandidate {
        stream_id: String,
        label: Option<u16>,
        id: Option<String>,
        candidate: String,
    },
    TakeConfiguration {
        stream_id: String,
        #[serde(rename = "type")]
        sdp_type: String,
        sdp: String,
    },
    Ping,
    GetIceServerConfig,
    GetStreamInfo {
        stream_id: String,
    },
    GetRoomInfo {
        room: String,
        stream_id: String,
    },
    GetSubtracks {
        stream_id: String,
        role: String,
        offset: u32,
        size: u32,
    },
    GetSubtracksCount {
        stream_id: String,
        role: String,
        status: String,
    },
    GetBroadcastObject {
        stream_id: String,
    },
    UpdateStreamMetaData {
        stream_id: String,
        meta_data: String,
    },
    GetVideoTrackAssignmentsCommand {
        stream_id: String,
    },
    ToggleVideo {
        stream_id: String,
        track_id: String,
        enabled: bool,
    },
    ToggleAudio {
        stream_id: String,
        track_id: String,
        enabled: bool,
    },
    EnableTrack {
        stream_id: String,
        track_id: String,
        enabled: bool,
    },
    GetTrackList {
        stream_id: String,
        token: String,
    },
    PeerMessageCommand {
        stream_id: String,
        definition: String,
        data: Value,
    },
    ForceStreamQuality {
        stream_id: String,
        stream_height: u32,
    },
    AssignVideoTrackCommand {
        stream_id: String,
        video_track_id: String,
        enabled: bool,
    },
    UpdateVideoTrackAssignmentsCommand {
        stream_id: String,
        offset: u32,
        size: u32,
    },
    SetMaxVideoTrackCountCommand {
        stream_id: String,
        max_track_count: u32,
    },
    GetDebugInfo {
        stream_id: String,
    },
    GetSubscriberCount {
        stream_id: String,
    },
    GetSubscribers {
        stream_id: String,
        offset: u32,
        size: u32,
    },
}

impl Command {
    /// Serialize this command to its wire form
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound message frames from the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Server accepted a publish request; start creating the local offer
    Start {
        stream_id: String,
    },
    TakeCandidate {
        stream_id: String,
        label: Option<u16>,
        id: Option<String>,
        #[serde(default)]
        candidate: String,
    },
    TakeConfiguration {
        stream_id: String,
        #[serde(rename = "type")]
        sdp_type: String,
        sdp: String,
        #[serde(default)]
        id_mapping: Option<HashMap<String, String>>,
    },
    /// Peer-to-peer teardown only; never sent for publish/play sessions
    Stop {
        stream_id: String,
    },
    Error {
        definition: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Notification {
        definition: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    StreamInformation {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    RoomInformation {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    TrackList {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    PeerMessageCommand {
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Pong,
    ConnectWithNewId {
        stream_id: String,
    },
    IceServerConfig {
        #[serde(default)]
        stun_server_uri: Option<String>,
        #[serde(default)]
        turn_server_username: Option<String>,
        #[serde(default)]
        turn_server_credential: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse a wire frame
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Parameters for a publish operation, cached for replay on reconnection
#[derive(Debug, Clone, Default)]
pub struct PublishParams {
    pub stream_id: String,
    pub token: Option<String>,
    pub subscriber_id: Option<String>,
    pub subscriber_code: Option<String>,
    pub stream_name: Option<String>,
    pub main_track: Option<String>,
    pub meta_data: Option<String>,
    pub role: Option<String>,
}

impl PublishParams {
    pub fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            ..Default::default()
        }
    }

    /// Build the wire command with the discovered track-presence flags
    pub fn to_command(&self, video: bool, audio: bool) -> Command {
        Command::Publish {
            stream_id: self.stream_id.clone(),
            token: self.token.clone().unwrap_or_default(),
            subscriber_id: self.subscriber_id.clone().unwrap_or_default(),
            subscriber_code: self.subscriber_code.clone().unwrap_or_default(),
            stream_name: self.stream_name.clone().unwrap_or_default(),
            main_track: self.main_track.clone().unwrap_or_default(),
            video,
            audio,
            meta_data: self.meta_data.clone().unwrap_or_default(),
            role: self.role.clone().unwrap_or_default(),
        }
    }
}

/// Parameters for a play operation, cached for replay on reconnection
#[derive(Debug, Clone, Default)]
pub struct PlayParams {
    pub stream_id: String,
    pub token: Option<String>,
    pub room_id: Option<String>,
    pub enable_tracks: Option<Vec<String>>,
    pub subscriber_id: Option<String>,
    pub subscriber_name: Option<String>,
    pub subscriber_code: Option<String>,
    pub meta_data: Option<String>,
    pub role: Option<String>,
    pub disable_tracks_by_default: bool,
}

impl PlayParams {
    pub fn new(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            ..Default::default()
        }
    }

    /// Build the wire command. `user_publish_id` is the currently published
    /// stream id of this instance, when there is one.
    pub fn to_command(&self, user_publish_id: Option<&str>) -> Command {
        Command::Play {
            stream_id: self.stream_id.clone(),
            token: self.token.clone().unwrap_or_default(),
            room: self.room_id.clone().unwrap_or_default(),
            track_list: self.enable_tracks.clone().unwrap_or_default(),
            subscriber_id: self.subscriber_id.clone().unwrap_or_default(),
            subscriber_name: self.subscriber_name.clone().unwrap_or_default(),
            subscriber_code: self.subscriber_code.clone().unwrap_or_default(),
            viewer_info: self.meta_data.clone().unwrap_or_default(),
            role: self.role.clone().unwrap_or_default(),
            user_publish_id: user_publish_id.unwrap_or_default().to_string(),
            disable_tracks_by_default: self.disable_tracks_by_default,
        }
    }
}
