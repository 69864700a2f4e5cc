//! Top-level signaling orchestrator
//!
//! Maps public operations (publish, play, room and peer lifecycle, track
//! and query commands) to wire commands, owns the per-stream session
//! registry and funnels every callback source (signaling channel,
//! negotiation engines, recovery timers) through one dispatch task.

use crate::channels::{sanitize_text, DataChannelMessenger};
use crate::config::{AdaptorConfig, IceServerConfig};
use crate::events::{DataPayload, EventBus, StreamError, StreamEvent};
use crate::media::{MediaProvider, StaticMediaProvider, TrackFlags};
use crate::peer::{
    is_candidate_allowed, CandidateDisposition, EngineEvent, EngineFactory, IceCandidate,
    IceConnectionState, PeerSession, ReplayCommand, RtcEngineFactory, SdpType, SessionDescription,
    SessionRole, SignalingState,
};
use crate::protocol::{Command, PlayParams, PublishParams, ServerMessage};
use crate::reconnect::{ReconnectionSupervisor, RecoveryDue, RECONNECT_DEBOUNCE, RECOVERY_SETTLE_DELAY};
use crate::signaling::{
    ChannelFactory, SignalingChannel, TransportEvent, WebSocketChannelFactory,
};
use crate::stats::StreamStats;
use crate::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Server error definitions that make the session unrecoverable as-is:
/// the session is closed immediately and a recovery evaluation scheduled.
const RESOURCE_UNAVAILABLE_DEFINITIONS: [&str; 4] = [
    "no_stream_exist",
    "unauthorized_access",
    "highResourceUsage",
    "streamIdInUse",
];

/// Client-side orchestrator for one signaling connection
///
/// One instance manages any number of publish/play/peer sessions over a
/// single signaling channel, recovering them through a global debounced
/// supervisor when the transport or a peer connection fails.
pub struct SignalingOrchestrator {
    inner: Arc<Inner>,
    dispatch: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

struct Inner {
    config: Arc<AdaptorConfig>,
    ice_config: parking_lot::RwLock<IceServerConfig>,
    channel: Arc<dyn SignalingChannel>,
    engines: Arc<dyn EngineFactory>,
    media: Arc<dyn MediaProvider>,
    sessions: tokio::sync::RwLock<HashMap<String, Arc<PeerSession>>>,
    publish_stream_id: parking_lot::RwLock<Option<String>>,
    multi_peer_stream_id: parking_lot::RwLock<Option<String>>,
    room_name: parking_lot::RwLock<Option<String>>,
    events: EventBus,
    supervisor: ReconnectionSupervisor,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl SignalingOrchestrator {
    /// Create an orchestrator with the default WebSocket channel and
    /// webrtc-rs engine, and connect the signaling channel.
    pub async fn connect(config: AdaptorConfig) -> Result<Self> {
        config.validate()?;

        let media: Arc<dyn MediaProvider> = Arc::new(StaticMediaProvider::new(
            if config.is_play_mode || config.only_data_channel {
                TrackFlags::none()
            } else {
                TrackFlags::new(true, true)
            },
        ));

        let channel_factory = WebSocketChannelFactory::new(Arc::new(config.clone()));
        let orchestrator = Self::with_components(
            config,
            &channel_factory,
            Arc::new(RtcEngineFactory::new()),
            media,
        );
        orchestrator.inner.channel.connect().await?;
        Ok(orchestrator)
    }

    /// Create an orchestrator from explicit collaborators. The channel is
    /// not connected; callers drive that themselves.
    pub fn with_components(
        config: AdaptorConfig,
        channel_factory: &dyn ChannelFactory,
        engines: Arc<dyn EngineFactory>,
        media: Arc<dyn MediaProvider>,
    ) -> Self {
        let config = Arc::new(config);

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (recovery_tx, recovery_rx) = mpsc::unbounded_channel();

        let channel = channel_factory.create(transport_tx);

        let inner = Arc::new(Inner {
            ice_config: parking_lot::RwLock::new(config.initial_ice_config()),
            channel,
            engines,
            media,
            sessions: tokio::sync::RwLock::new(HashMap::new()),
            publish_stream_id: parking_lot::RwLock::new(None),
            multi_peer_stream_id: parking_lot::RwLock::new(None),
            room_name: parking_lot::RwLock::new(None),
            events: EventBus::new(),
            supervisor: ReconnectionSupervisor::new(config.reconnect_if_required, recovery_tx),
            engine_tx,
            config,
        });

        let dispatch = tokio::spawn(dispatch_loop(
            Arc::downgrade(&inner),
            transport_rx,
            engine_rx,
            recovery_rx,
        ));

        Self {
            inner,
            dispatch: parking_lot::Mutex::new(Some(dispatch)),
        }
    }

    /// Register an event listener
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_listener(listener);
    }

    /// Register an error listener
    pub fn add_error_listener<F>(&self, listener: F)
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.inner.events.add_error_listener(listener);
    }

    /// Start a publish session. Parameters are cached for replay and the
    /// session exists before the server acknowledges.
    pub async fn publish(&self, params: PublishParams) -> Result<()> {
        self.inner.publish(params).await
    }

    /// Start a play session. Parameters are cached for replay.
    pub async fn play(&self, params: PlayParams) -> Result<()> {
        self.inner.play(params).await
    }

    /// Join a peer-to-peer session
    pub async fn join(&self, stream_id: &str) -> Result<()> {
        self.inner.join(stream_id).await
    }

    /// Leave a peer-to-peer session and close its peer connection
    pub async fn leave(&self, stream_id: &str) -> Result<()> {
        self.inner.leave(stream_id).await
    }

    /// Join a conference room
    pub async fn join_room(
        &self,
        room: &str,
        stream_id: &str,
        mode: &str,
        stream_name: &str,
        role: &str,
        metadata: &str,
    ) -> Result<()> {
        self.inner
            .join_room(room, stream_id, mode, stream_name, role, metadata)
            .await
    }

    /// Leave a conference room, closing all owned sessions
    pub async fn leave_from_room(&self, room: &str, stream_id: &str) -> Result<()> {
        self.inner.leave_from_room(room, stream_id).await
    }

    /// Stop a publish/play session. Safe to call twice.
    pub async fn stop(&self, stream_id: &str) -> Result<()> {
        self.inner.stop(stream_id).await
    }

    /// Send a payload over the session's data channel, chunking large
    /// binary messages.
    pub async fn send_data(&self, stream_id: &str, payload: DataPayload) -> Result<()> {
        self.inner.send_data(stream_id, payload).await
    }

    /// Fetch and fold one statistics sample for the stream
    pub async fn get_stats(&self, stream_id: &str) -> Result<StreamStats> {
        self.inner.get_stats(stream_id).await
    }

    /// Start periodic stats sampling for the stream
    pub async fn enable_stats(&self, stream_id: &str, period: Option<Duration>) -> Result<()> {
        self.inner.enable_stats(stream_id, period).await
    }

    /// Stop periodic stats sampling for the stream
    pub async fn disable_stats(&self, stream_id: &str) {
        if let Some(session) = self.inner.session(stream_id).await {
            session.clear_stats_task();
        }
    }

    /// ICE connection state of one session, when it exists
    pub async fn ice_connection_state(&self, stream_id: &str) -> Option<IceConnectionState> {
        self.inner
            .session(stream_id)
            .await
            .map(|s| s.engine().ice_connection_state())
    }

    /// SDP negotiation status of one session, when it exists
    pub async fn sdp_status(&self, stream_id: &str) -> Option<crate::peer::SdpStatus> {
        match self.inner.session(stream_id).await {
            Some(session) => Some(session.sdp_status().await),
            None => None,
        }
    }

    /// Signaling state of one session, when it exists
    pub async fn signaling_state(&self, stream_id: &str) -> Option<SignalingState> {
        self.inner
            .session(stream_id)
            .await
            .map(|s| s.engine().signaling_state())
    }

    /// Kinds of the local senders attached to one session
    pub async fn sender_kinds(&self, stream_id: &str) -> Vec<String> {
        match self.inner.session(stream_id).await {
            Some(session) => session.engine().sender_kinds().await,
            None => Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_connected()
    }

    /// Room joined most recently, when any
    pub fn room(&self) -> Option<String> {
        self.inner.room_name.read().clone()
    }

    /// Stream id of the publish session, when one was started
    pub fn publish_stream_id(&self) -> Option<String> {
        self.inner.publish_stream_id.read().clone()
    }

    /// Close every session and the signaling channel. The instance cannot
    /// be reused afterwards.
    pub async fn close_web_socket(&self) {
        self.inner.close_all_sessions().await;
        self.inner.channel.close().await;
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
    }

    // ------------------------------------------------------------------
    // Track and query pass-throughs
    // ------------------------------------------------------------------

    /// Ask the server for its ICE configuration. A no-op when the caller
    /// supplied ICE servers of its own.
    pub async fn get_ice_server_configuration(&self) -> Result<()> {
        if self.inner.config.user_defined_ice_servers {
            return Ok(());
        }
        self.inner.send_command(&Command::GetIceServerConfig).await
    }

    /// Toggle a video track on the server side
    pub async fn toggle_video(&self, stream_id: &str, track_id: &str, enabled: bool) -> Result<()> {
        self.inner
            .send_command(&Command::ToggleVideo {
                stream_id: stream_id.to_string(),
                track_id: track_id.to_string(),
                enabled,
            })
            .await
    }

    /// Toggle an audio track on the server side
    pub async fn toggle_audio(&self, stream_id: &str, track_id: &str, enabled: bool) -> Result<()> {
        self.inner
            .send_command(&Command::ToggleAudio {
                stream_id: stream_id.to_string(),
                track_id: track_id.to_string(),
                enabled,
            })
            .await
    }

    /// Enable or disable data flow for a subtrack
    pub async fn enable_track(&self, stream_id: &str, track_id: &str, enabled: bool) -> Result<()> {
        self.inner
            .send_command(&Command::EnableTrack {
                stream_id: stream_id.to_string(),
                track_id: track_id.to_string(),
                enabled,
            })
            .await
    }

    /// Request stream information; the server answers with a
    /// `streamInformation` event.
    pub async fn get_stream_info(&self, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetStreamInfo {
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Request room information; the server answers with a
    /// `roomInformation` event.
    pub async fn get_room_info(&self, room: &str, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetRoomInfo {
                room: room.to_string(),
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Request a page of the subtrack list of a main track
    pub async fn get_subtracks(
        &self,
        stream_id: &str,
        role: &str,
        offset: u32,
        size: u32,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::GetSubtracks {
                stream_id: stream_id.to_string(),
                role: role.to_string(),
                offset,
                size,
            })
            .await
    }

    /// Request the subtrack count of a main track
    pub async fn get_subtrack_count(
        &self,
        stream_id: &str,
        role: &str,
        status: &str,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::GetSubtracksCount {
                stream_id: stream_id.to_string(),
                role: role.to_string(),
                status: status.to_string(),
            })
            .await
    }

    /// Request the broadcast object for a stream
    pub async fn get_broadcast_object(&self, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetBroadcastObject {
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Update the free-text metadata of a stream
    pub async fn update_stream_meta_data(&self, stream_id: &str, meta_data: &str) -> Result<()> {
        self.inner
            .send_command(&Command::UpdateStreamMetaData {
                stream_id: stream_id.to_string(),
                meta_data: meta_data.to_string(),
            })
            .await
    }

    /// Request the current video track assignments
    pub async fn request_video_track_assignments(&self, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetVideoTrackAssignmentsCommand {
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Pin a video track to a participant
    pub async fn assign_video_track(
        &self,
        video_track_id: &str,
        stream_id: &str,
        enabled: bool,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::AssignVideoTrackCommand {
                stream_id: stream_id.to_string(),
                video_track_id: video_track_id.to_string(),
                enabled,
            })
            .await
    }

    /// Page through participant video-track assignments
    pub async fn update_video_track_assignments(
        &self,
        stream_id: &str,
        offset: u32,
        size: u32,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::UpdateVideoTrackAssignmentsCommand {
                stream_id: stream_id.to_string(),
                offset,
                size,
            })
            .await
    }

    /// Set the maximum video track count for a conference
    pub async fn set_max_video_track_count(&self, stream_id: &str, count: u32) -> Result<()> {
        self.inner
            .send_command(&Command::SetMaxVideoTrackCountCommand {
                stream_id: stream_id.to_string(),
                max_track_count: count,
            })
            .await
    }

    /// Request the track ids under a main stream
    pub async fn get_track_list(&self, stream_id: &str, token: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetTrackList {
                stream_id: stream_id.to_string(),
                token: token.to_string(),
            })
            .await
    }

    /// Send a message to the other peer in a peer-to-peer session
    pub async fn peer_message(
        &self,
        stream_id: &str,
        definition: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::PeerMessageCommand {
                stream_id: stream_id.to_string(),
                definition: definition.to_string(),
                data,
            })
            .await
    }

    /// Force the server to a fixed resolution for adaptive streams
    pub async fn force_stream_quality(&self, stream_id: &str, height: u32) -> Result<()> {
        self.inner
            .send_command(&Command::ForceStreamQuality {
                stream_id: stream_id.to_string(),
                stream_height: height,
            })
            .await
    }

    /// Request the subscriber count of a stream
    pub async fn get_subscriber_count(&self, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetSubscriberCount {
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Request a page of the subscriber list of a stream
    pub async fn get_subscriber_list(
        &self,
        stream_id: &str,
        offset: u32,
        size: u32,
    ) -> Result<()> {
        self.inner
            .send_command(&Command::GetSubscribers {
                stream_id: stream_id.to_string(),
                offset,
                size,
            })
            .await
    }

    /// Request server-side debug data for a conference
    pub async fn get_debug_info(&self, stream_id: &str) -> Result<()> {
        self.inner
            .send_command(&Command::GetDebugInfo {
                stream_id: stream_id.to_string(),
            })
            .await
    }

    /// Broadcast this participant's audio level over the data channel
    pub async fn update_audio_level(&self, stream_id: &str, level: u8) -> Result<()> {
        let message = json!({
            "streamId": stream_id,
            "eventType": "UPDATE_AUDIO_LEVEL",
            "audioLevel": level,
        });
        self.inner
            .send_data(stream_id, DataPayload::Text(message.to_string()))
            .await
    }
}

/// One merged event, so every state transition runs on the dispatch task
enum Dispatched {
    Transport(TransportEvent),
    Engine(EngineEvent),
    Recovery(RecoveryDue),
}

async fn dispatch_loop(
    inner: Weak<Inner>,
    mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut recovery_rx: mpsc::UnboundedReceiver<RecoveryDue>,
) {
    loop {
        let event = tokio::select! {
            Some(ev) = transport_rx.recv() => Dispatched::Transport(ev),
            Some(ev) = engine_rx.recv() => Dispatched::Engine(ev),
            Some(due) = recovery_rx.recv() => Dispatched::Recovery(due),
            else => break,
        };

        let Some(inner) = inner.upgrade() else { break };
        match event {
            Dispatched::Transport(ev) => inner.handle_transport_event(ev).await,
            Dispatched::Engine(ev) => inner.handle_engine_event(ev).await,
            Dispatched::Recovery(due) => inner.handle_recovery_due(due).await,
        }
    }
    debug!("Dispatch loop terminated");
}

impl Inner {
    async fn send_command(&self, command: &Command) -> Result<()> {
        let json = command.to_json()?;
        match self.channel.send(json).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Cannot send signaling command: {}", e);
                self.events.notify_error(&StreamError::WebSocketNotConnected);
                Err(e)
            }
        }
    }

    async fn session(&self, stream_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(stream_id).cloned()
    }

    /// Fetch the session for the stream id, creating it (and its engine)
    /// when unknown. At most one session ever exists per stream id.
    async fn get_or_create_session(
        &self,
        stream_id: &str,
        role: SessionRole,
    ) -> Result<Arc<PeerSession>> {
        if let Some(session) = self.session(stream_id).await {
            return Ok(session);
        }

        let servers = self.ice_config.read().servers.clone();
        let engine = self
            .engines
            .create_engine(stream_id, role, servers, self.engine_tx.clone())
            .await?;

        let session = Arc::new(PeerSession::new(
            stream_id,
            role,
            engine,
            self.config.candidate_transports.clone(),
        ));

        // The publisher opens the channel; in play mode the server does.
        if self.config.data_channel_enabled && role != SessionRole::Play {
            match session.engine().create_data_channel(stream_id).await {
                Ok(handle) => session.set_data_channel(handle).await,
                Err(e) => warn!(
                    "Cannot create data channel for stream {}: {}",
                    stream_id, e
                ),
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(stream_id) {
            // Another caller raced us through the await; keep the first.
            let existing = Arc::clone(existing);
            drop(sessions);
            session.close().await;
            return Ok(existing);
        }
        sessions.insert(stream_id.to_string(), Arc::clone(&session));
        debug!("Session created for stream {} ({})", stream_id, role.as_str());

        Ok(session)
    }

    /// Remove and close the session; no-op for unknown stream ids
    async fn close_session(&self, stream_id: &str) -> bool {
        let session = self.sessions.write().await.remove(stream_id);
        match session {
            Some(session) => {
                info!("Session closed for stream {}", stream_id);
                session.close().await;
                true
            }
            None => false,
        }
    }

    async fn close_all_sessions(&self) {
        let sessions: Vec<Arc<PeerSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }

    async fn publish(self: &Arc<Self>, params: PublishParams) -> Result<()> {
        let stream_id = params.stream_id.clone();
        *self.publish_stream_id.write() = Some(stream_id.clone());

        let flags = if self.config.only_data_channel {
            TrackFlags::none()
        } else {
            self.media.ensure_local_media().await?
        };

        let session = self
            .get_or_create_session(&stream_id, SessionRole::Publish)
            .await?;
        session.cache_replay(ReplayCommand::Publish(params.clone()));

        let result = self
            .send_command(&params.to_command(flags.video, flags.audio))
            .await;

        // Armed even when the send failed: the supervisor replays the
        // cached command once the channel recovers.
        self.supervisor.schedule(RECONNECT_DEBOUNCE, false);

        result
    }

    async fn play(self: &Arc<Self>, params: PlayParams) -> Result<()> {
        let stream_id = params.stream_id.clone();

        let session = self
            .get_or_create_session(&stream_id, SessionRole::Play)
            .await?;
        session.cache_replay(ReplayCommand::Play(params.clone()));

        let user_publish_id = self.publish_stream_id.read().clone();
        let result = self
            .send_command(&params.to_command(user_publish_id.as_deref()))
            .await;

        self.supervisor.schedule(RECONNECT_DEBOUNCE, false);

        result
    }

    async fn join(self: &Arc<Self>, stream_id: &str) -> Result<()> {
        self.get_or_create_session(stream_id, SessionRole::Peer)
            .await?;

        let multi_peer =
            self.config.multi_peer && self.multi_peer_stream_id.read().is_none();
        self.send_command(&Command::Join {
            stream_id: stream_id.to_string(),
            multi_peer,
            mode: if self.config.is_play_mode {
                "play".to_string()
            } else {
                "both".to_string()
            },
        })
        .await
    }

    async fn leave(&self, stream_id: &str) -> Result<()> {
        let effective = self
            .multi_peer_stream_id
            .write()
            .take()
            .unwrap_or_else(|| stream_id.to_string());

        let result = self
            .send_command(&Command::Leave {
                stream_id: effective,
            })
            .await;

        self.close_session(stream_id).await;
        result
    }

    async fn join_room(
        &self,
        room: &str,
        stream_id: &str,
        mode: &str,
        stream_name: &str,
        role: &str,
        metadata: &str,
    ) -> Result<()> {
        *self.room_name.write() = Some(room.to_string());

        self.send_command(&Command::JoinRoom {
            room: room.to_string(),
            main_track: room.to_string(),
            stream_id: stream_id.to_string(),
            mode: mode.to_string(),
            stream_name: stream_name.to_string(),
            role: role.to_string(),
            metadata: metadata.to_string(),
        })
        .await
    }

    async fn leave_from_room(&self, room: &str, stream_id: &str) -> Result<()> {
        self.close_all_sessions().await;
        *self.room_name.write() = Some(room.to_string());
        debug!("Leave request is sent for room {}", room);

        self.send_command(&Command::LeaveFromRoom {
            room: room.to_string(),
            main_track: room.to_string(),
            stream_id: stream_id.to_string(),
        })
        .await
    }

    /// Close the session and tell the server, when it can hear us.
    /// Calling twice is safe; the second call is a no-op with no error.
    async fn stop(&self, stream_id: &str) -> Result<()> {
        self.close_session(stream_id).await;

        if self.channel.is_connected() {
            if let Err(e) = self
                .send_command(&Command::Stop {
                    stream_id: stream_id.to_string(),
                })
                .await
            {
                warn!("Stop command could not be sent for {}: {}", stream_id, e);
            }
        }
        Ok(())
    }

    async fn send_data(&self, stream_id: &str, payload: DataPayload) -> Result<()> {
        let session = self.session(stream_id).await.ok_or_else(|| {
            warn!(
                "Send data is called for undefined session with stream id: {}",
                stream_id
            );
            Error::SessionNotFound(stream_id.to_string())
        })?;

        let channel = session.data_channel().await.ok_or_else(|| {
            Error::DataChannelError(format!("No data channel for stream {}", stream_id))
        })?;

        if !channel.is_open() {
            return Err(Error::DataChannelError(format!(
                "Data channel is not open for stream {}",
                stream_id
            )));
        }

        match payload {
            DataPayload::Text(text) => channel.send_text(&text).await,
            DataPayload::Binary(data) => {
                for frame in DataChannelMessenger::split_binary(&data) {
                    channel.send_binary(&frame).await?;
                }
                Ok(())
            }
        }
    }

    async fn get_stats(&self, stream_id: &str) -> Result<StreamStats> {
        let session = self
            .session(stream_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(stream_id.to_string()))?;

        let samples = session.engine().get_stats().await?;
        let snapshot = session.fold_stats(&samples).await;
        self.events.notify(&StreamEvent::UpdatedStats(snapshot.clone()));
        Ok(snapshot)
    }

    async fn enable_stats(
        self: &Arc<Self>,
        stream_id: &str,
        period: Option<Duration>,
    ) -> Result<()> {
        let session = self
            .session(stream_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(stream_id.to_string()))?;

        if session.has_stats_task() {
            return Ok(());
        }

        let period = period.unwrap_or(self.config.stats_period);
        let weak = Arc::downgrade(self);
        let stream_id = stream_id.to_string();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.get_stats(&stream_id).await.is_err() {
                    break;
                }
            }
        });

        let _ = session.set_stats_task(task);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn handle_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.events.notify(&StreamEvent::Initialized);
                if !self.config.user_defined_ice_servers {
                    let _ = self.send_command(&Command::GetIceServerConfig).await;
                }
            }
            TransportEvent::Message(text) => match ServerMessage::from_json(&text) {
                Ok(message) => self.handle_server_message(message).await,
                Err(e) => warn!("Failed to parse signaling message: {}", e),
            },
            TransportEvent::Closed => {
                info!(
                    "Signaling connection closed. It will reconnect immediately if there are \
                     active sessions"
                );
                self.events.notify(&StreamEvent::Closed);
                self.supervisor.schedule(Duration::ZERO, true);
            }
        }
    }

    async fn handle_server_message(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Start { stream_id } => {
                self.events.notify(&StreamEvent::PublishStarted {
                    stream_id: stream_id.clone(),
                });
                self.start_publishing(&stream_id).await;
            }
            ServerMessage::TakeCandidate {
                stream_id,
                label,
                id,
                candidate,
            } => {
                let candidate = IceCandidate {
                    candidate,
                    sdp_mid: id,
                    sdp_mline_index: label,
                    protocol: None,
                };
                self.take_candidate(&stream_id, candidate).await;
            }
            ServerMessage::TakeConfiguration {
                stream_id,
                sdp_type,
                sdp,
                id_mapping,
            } => {
                self.take_configuration(&stream_id, &sdp_type, sdp, id_mapping)
                    .await;
            }
            ServerMessage::Stop { stream_id } => {
                debug!("Stop command received for stream {}", stream_id);
                self.close_session(&stream_id).await;
            }
            ServerMessage::Error { definition, extra } => {
                warn!("Server error: {}", definition);
                let resource_gone = RESOURCE_UNAVAILABLE_DEFINITIONS
                    .contains(&definition.as_str());
                if resource_gone {
                    if let Some(stream_id) =
                        extra.get("streamId").and_then(|v| v.as_str())
                    {
                        self.close_session(stream_id).await;
                    }
                    self.supervisor.schedule(RECONNECT_DEBOUNCE, false);
                }
                self.events.notify_error(&StreamError::ServerError {
                    definition,
                    payload: extra,
                });
            }
            ServerMessage::Notification { definition, extra } => {
                if definition == "server_will_stop" {
                    info!("Server will stop; forcing recovery over a fresh connection");
                    self.channel.close().await;
                    self.supervisor.schedule(Duration::ZERO, true);
                }
                self.events.notify(&StreamEvent::Notification {
                    definition,
                    payload: extra,
                });
            }
            ServerMessage::StreamInformation { extra } => {
                self.events
                    .notify(&StreamEvent::StreamInformation { payload: extra });
            }
            ServerMessage::RoomInformation { extra } => {
                self.events
                    .notify(&StreamEvent::RoomInformation { payload: extra });
            }
            ServerMessage::TrackList { extra } => {
                self.events.notify(&StreamEvent::TrackList { payload: extra });
            }
            ServerMessage::PeerMessageCommand { extra } => {
                self.events.notify(&StreamEvent::PeerMessage { payload: extra });
            }
            ServerMessage::Pong => {
                self.events.notify(&StreamEvent::Pong);
            }
            ServerMessage::ConnectWithNewId { stream_id } => {
                *self.multi_peer_stream_id.write() = Some(stream_id.clone());
                self.events.notify(&StreamEvent::ConnectWithNewId {
                    stream_id: stream_id.clone(),
                });
                if let Err(e) = self.join(&stream_id).await {
                    error!("Cannot re-join with new id {}: {}", stream_id, e);
                }
            }
            ServerMessage::IceServerConfig {
                stun_server_uri,
                turn_server_username,
                turn_server_credential,
            } => {
                if let Some(uri) = stun_server_uri {
                    debug!("Received ice server config: {}", uri);
                    self.ice_config.write().apply_server_push(
                        &uri,
                        turn_server_username.as_deref(),
                        turn_server_credential.as_deref(),
                    );
                }
            }
            ServerMessage::Unknown => {
                debug!("Ignoring unknown signaling command");
            }
        }
    }

    /// Server accepted the publish; create and transmit the local offer
    async fn start_publishing(self: &Arc<Self>, stream_id: &str) {
        let session = match self
            .get_or_create_session(stream_id, SessionRole::Publish)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                error!("Cannot create session for stream {}: {}", stream_id, e);
                return;
            }
        };

        match session.create_local_offer().await {
            Ok(offer) => {
                let _ = self.send_configuration(stream_id, &offer).await;
            }
            Err(e) => {
                error!("Create offer error for stream id {}: {}", stream_id, e);
            }
        }
    }

    async fn send_configuration(
        &self,
        stream_id: &str,
        desc: &SessionDescription,
    ) -> Result<()> {
        self.send_command(&Command::TakeConfiguration {
            stream_id: stream_id.to_string(),
            sdp_type: desc.sdp_type.as_str().to_string(),
            sdp: desc.sdp.clone(),
        })
        .await
    }

    async fn take_candidate(self: &Arc<Self>, stream_id: &str, candidate: IceCandidate) {
        let session = match self.get_or_create_session(stream_id, SessionRole::Peer).await {
            Ok(session) => session,
            Err(e) => {
                error!("Cannot create session for stream {}: {}", stream_id, e);
                return;
            }
        };

        let text = candidate.candidate.clone();
        match session.take_candidate(candidate).await {
            CandidateDisposition::Rejected => {
                debug!(
                    "Candidate is not supported (full sdp: {}). Supported protocols: {:?}",
                    text, self.config.candidate_transports
                );
                self.events
                    .notify_error(&StreamError::ProtocolNotSupported { candidate: text });
            }
            disposition => {
                debug!("takeCandidate for {}: {:?}", stream_id, disposition);
            }
        }
    }

    async fn take_configuration(
        self: &Arc<Self>,
        stream_id: &str,
        sdp_type: &str,
        sdp: String,
        id_mapping: Option<HashMap<String, String>>,
    ) {
        let Some(sdp_type) = SdpType::from_str(sdp_type) else {
            warn!("Unknown SDP type in takeConfiguration: {}", sdp_type);
            return;
        };

        // An offer means the remote side publishes: play-style session.
        let role = match sdp_type {
            SdpType::Offer => SessionRole::Play,
            SdpType::Answer => SessionRole::Publish,
        };

        let session = match self.get_or_create_session(stream_id, role).await {
            Ok(session) => session,
            Err(e) => {
                error!("Cannot create session for stream {}: {}", stream_id, e);
                return;
            }
        };

        if let Some(mapping) = id_mapping {
            session.set_id_mapping(mapping).await;
        }

        let desc = SessionDescription { sdp_type, sdp };
        match session.accept_remote_description(&desc).await {
            Ok(true) => {
                debug!("Trying to create answer for stream id: {}", stream_id);
                match session.create_local_answer().await {
                    Ok(answer) => {
                        if self.send_configuration(stream_id, &answer).await.is_ok() {
                            session.mark_active().await;
                        }
                    }
                    Err(e) => error!("Create answer error: {}", e),
                }
            }
            Ok(false) => {}
            Err(e) => {
                error!(
                    "Set remote description is failed for stream {} with error: {}",
                    stream_id, e
                );
                self.events
                    .notify_error(&StreamError::NotSetRemoteDescription {
                        stream_id: stream_id.to_string(),
                    });
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine events
    // ------------------------------------------------------------------

    async fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::IceCandidate {
                stream_id,
                candidate,
            } => {
                self.local_candidate(&stream_id, candidate).await;
            }
            EngineEvent::IceConnectionStateChange { stream_id, state } => {
                debug!(
                    "Ice connection state is {} for stream {}",
                    state.as_str(),
                    stream_id
                );
                match state {
                    IceConnectionState::Failed | IceConnectionState::Closed => {
                        self.supervisor.schedule(Duration::ZERO, false);
                    }
                    IceConnectionState::Disconnected => {
                        // May self-heal; re-evaluate after the full window.
                        self.supervisor.schedule(RECONNECT_DEBOUNCE, false);
                    }
                    _ => {}
                }
                self.events.notify(&StreamEvent::IceConnectionStateChanged {
                    stream_id,
                    state,
                });
            }
            EngineEvent::Track { stream_id, track } => {
                let session = self.session(&stream_id).await;
                let assigned_track_id = match &session {
                    Some(session) => match session.resolve_track_id(&track.id).await {
                        Some(id) => Some(id),
                        None => session.resolve_track_id(&track.stream_id).await,
                    },
                    None => None,
                };
                self.events.notify(&StreamEvent::NewTrackAvailable {
                    stream_id,
                    track,
                    assigned_track_id,
                });
            }
            EngineEvent::DataChannel { stream_id, channel } => {
                if let Some(session) = self.session(&stream_id).await {
                    session.set_data_channel(channel).await;
                }
            }
            EngineEvent::DataChannelOpen { stream_id } => {
                debug!("Data channel is opened for stream {}", stream_id);
                self.events
                    .notify(&StreamEvent::DataChannelOpened { stream_id });
            }
            EngineEvent::DataChannelClose { stream_id } => {
                debug!("Data channel is closed for stream {}", stream_id);
                self.events
                    .notify(&StreamEvent::DataChannelClosed { stream_id });
            }
            EngineEvent::DataChannelError { stream_id, message } => {
                self.events
                    .notify_error(&StreamError::DataChannelError { stream_id, message });
            }
            EngineEvent::DataChannelMessage {
                stream_id,
                is_text,
                data,
            } => {
                self.data_channel_message(&stream_id, is_text, data).await;
            }
        }
    }

    /// Forward a locally gathered candidate, subject to the transport
    /// allow-list. The empty end-of-candidates marker always passes.
    async fn local_candidate(&self, stream_id: &str, candidate: IceCandidate) {
        if is_candidate_allowed(&candidate, &self.config.candidate_transports) {
            let _ = self
                .send_command(&Command::TakeCandidate {
                    stream_id: stream_id.to_string(),
                    label: candidate.sdp_mline_index,
                    id: candidate.sdp_mid,
                    candidate: candidate.candidate,
                })
                .await;
        } else {
            debug!(
                "Candidate's protocol ({:?}) is not supported. Candidate: {} Supported protocols: {:?}",
                candidate.protocol, candidate.candidate, self.config.candidate_transports
            );
            if !candidate.is_end_of_candidates() {
                self.events.notify_error(&StreamError::ProtocolNotSupported {
                    candidate: candidate.candidate,
                });
            }
        }
    }

    async fn data_channel_message(&self, stream_id: &str, is_text: bool, data: Vec<u8>) {
        if is_text {
            let text = String::from_utf8_lossy(&data);
            self.events.notify(&StreamEvent::DataReceived {
                stream_id: stream_id.to_string(),
                data: DataPayload::Text(sanitize_text(&text)),
            });
            return;
        }

        let Some(session) = self.session(stream_id).await else {
            debug!(
                "Dropping data channel frame for unknown stream {}",
                stream_id
            );
            return;
        };

        if let Some(message) = session.accept_chunk(&data).await {
            self.events.notify(&StreamEvent::DataReceived {
                stream_id: stream_id.to_string(),
                data: DataPayload::Binary(message),
            });
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    async fn handle_recovery_due(self: &Arc<Self>, due: RecoveryDue) {
        self.supervisor.acknowledge();

        if !self.supervisor.begin_attempt(due.force) {
            return;
        }

        // The transport itself may be the failed piece; re-dial before
        // replaying so the reissued commands have somewhere to go.
        if !self.channel.is_connected() && !self.channel.is_connecting() {
            if let Err(e) = self.channel.connect().await {
                warn!("Signaling reconnect failed: {}", e);
            }
        }

        let sessions: Vec<Arc<PeerSession>> =
            self.sessions.read().await.values().cloned().collect();
        let publish_id = self.publish_stream_id.read().clone();

        for session in sessions {
            let is_publisher = publish_id.as_deref() == Some(session.stream_id.as_str());
            if !due.force && session.engine().ice_connection_state().is_alive() {
                continue;
            }

            let Some(replay) = session.replay_command() else {
                continue;
            };
            let stream_id = session.stream_id.clone();

            if is_publisher {
                self.events
                    .notify(&StreamEvent::ReconnectionAttemptForPublisher {
                        stream_id: stream_id.clone(),
                    });
            } else {
                self.events
                    .notify(&StreamEvent::ReconnectionAttemptForPlayer {
                        stream_id: stream_id.clone(),
                    });
            }

            info!(
                "It will try again for stream {} because it is not stopped on purpose",
                stream_id
            );
            let _ = self.stop(&stream_id).await;

            // The server may not have dropped the old connection yet;
            // reissuing immediately can trigger an already-streaming error.
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(RECOVERY_SETTLE_DELAY).await;
                let result = match replay {
                    ReplayCommand::Publish(params) => {
                        info!("Trying publish again for stream: {}", params.stream_id);
                        inner.publish(params).await
                    }
                    ReplayCommand::Play(params) => {
                        info!("Trying play again for stream: {}", params.stream_id);
                        inner.play(params).await
                    }
                };
                if let Err(e) = result {
                    warn!("Recovery attempt failed for stream {}: {}", stream_id, e);
                }
            });
        }
    }
}

impl Drop for SignalingOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
    }
}
