//! webrtc-rs backed negotiation engine
//!
//! Adapts an `RTCPeerConnection` to the [`PeerConnectionEngine`] contract.
//! Engine callbacks are forwarded as [`EngineEvent`]s to the orchestrator's
//! dispatch stream.

use super::engine::{
    DataChannelHandle, EngineEvent, EngineFactory, IceCandidate, IceConnectionState,
    PeerConnectionEngine, SdpType, SessionDescription, SessionRole, SignalingState,
};
use crate::events::TrackInfo;
use crate::stats::StatsSample;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Negotiation engine over one `RTCPeerConnection`
pub struct RtcEngine {
    stream_id: String,
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl RtcEngine {
    /// Create a peer connection with the default codec set and wire its
    /// callbacks into the event stream.
    pub async fn new(
        stream_id: &str,
        ice_servers: Vec<crate::config::IceServer>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        info!("Creating peer connection for stream {}", stream_id);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: vec![server.urls.clone()],
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?);

        let engine = Self {
            stream_id: stream_id.to_string(),
            pc,
            events,
        };
        engine.wire_callbacks();

        Ok(engine)
    }

    fn wire_callbacks(&self) {
        // Local ICE candidates; a None candidate marks the end of gathering
        // and is forwarded as the empty-payload marker.
        let events = self.events.clone();
        let stream_id = self.stream_id.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                let stream_id = stream_id.clone();
                Box::pin(async move {
                    let candidate = match candidate {
                        Some(c) => {
                            let protocol = {
                                let p = c.protocol.to_string().to_lowercase();
                                if p == "udp" || p == "tcp" {
                                    Some(p)
                                } else {
                                    None
                                }
                            };
                            match c.to_json() {
                                Ok(init) => IceCandidate {
                                    candidate: init.candidate,
                                    sdp_mid: init.sdp_mid,
                                    sdp_mline_index: init.sdp_mline_index,
                                    protocol,
                                },
                                Err(e) => {
                                    warn!("Failed to convert ICE candidate to JSON: {}", e);
                                    return;
                                }
                            }
                        }
                        None => {
                            debug!("ICE gathering complete for stream {}", stream_id);
                            IceCandidate::default()
                        }
                    };
                    let _ = events.send(EngineEvent::IceCandidate {
                        stream_id,
                        candidate,
                    });
                })
            }));

        let events = self.events.clone();
        let stream_id = self.stream_id.clone();
        self.pc.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let events = events.clone();
                let stream_id = stream_id.clone();
                Box::pin(async move {
                    let _ = events.send(EngineEvent::IceConnectionStateChange {
                        stream_id,
                        state: map_ice_state(state),
                    });
                })
            },
        ));

        let events = self.events.clone();
        let stream_id = self.stream_id.clone();
        self.pc
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let stream_id = stream_id.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => "audio",
                        RTPCodecType::Video => "video",
                        _ => return,
                    };
                    info!("Remote {} track added for stream {}", kind, stream_id);
                    let _ = events.send(EngineEvent::Track {
                        stream_id,
                        track: TrackInfo {
                            id: track.id(),
                            kind: kind.to_string(),
                            stream_id: track.stream_id(),
                        },
                    });
                })
            }));

        // Data channel opened by the remote side (play/peer sessions)
        let events = self.events.clone();
        let stream_id = self.stream_id.clone();
        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let events = events.clone();
                let stream_id = stream_id.clone();
                Box::pin(async move {
                    info!(
                        "Data channel received for stream {}: label={}",
                        stream_id,
                        dc.label()
                    );
                    wire_data_channel(&dc, &stream_id, &events);
                    let handle: Arc<dyn DataChannelHandle> = Arc::new(RtcDataChannel {
                        dc: Arc::clone(&dc),
                    });
                    let _ = events.send(EngineEvent::DataChannel {
                        stream_id,
                        channel: handle,
                    });
                })
            }));
    }
}

/// Wire the per-channel callbacks into the engine event stream
fn wire_data_channel(
    dc: &Arc<RTCDataChannel>,
    stream_id: &str,
    events: &mpsc::UnboundedSender<EngineEvent>,
) {
    let ev = events.clone();
    let id = stream_id.to_string();
    dc.on_open(Box::new(move || {
        let _ = ev.send(EngineEvent::DataChannelOpen {
            stream_id: id.clone(),
        });
        Box::pin(async {})
    }));

    let ev = events.clone();
    let id = stream_id.to_string();
    dc.on_close(Box::new(move || {
        let _ = ev.send(EngineEvent::DataChannelClose {
            stream_id: id.clone(),
        });
        Box::pin(async {})
    }));

    let ev = events.clone();
    let id = stream_id.to_string();
    dc.on_error(Box::new(move |err| {
        let _ = ev.send(EngineEvent::DataChannelError {
            stream_id: id.clone(),
            message: err.to_string(),
        });
        Box::pin(async {})
    }));

    let ev = events.clone();
    let id = stream_id.to_string();
    dc.on_message(Box::new(move |msg| {
        let _ = ev.send(EngineEvent::DataChannelMessage {
            stream_id: id.clone(),
            is_text: msg.is_string,
            data: msg.data.to_vec(),
        });
        Box::pin(async {})
    }));
}

#[async_trait]
impl PeerConnectionEngine for RtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        let rtc_desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(rtc_desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        let rtc_desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(rtc_desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to create data channel: {}", e)))?;

        wire_data_channel(&dc, &self.stream_id, &self.events);

        Ok(Arc::new(RtcDataChannel { dc }))
    }

    async fn sender_kinds(&self) -> Vec<String> {
        let mut kinds = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                match track.kind() {
                    RTPCodecType::Audio => kinds.push("audio".to_string()),
                    RTPCodecType::Video => kinds.push("video".to_string()),
                    _ => {}
                }
            }
        }
        kinds
    }

    async fn get_stats(&self) -> Result<Vec<StatsSample>> {
        let report = self.pc.get_stats().await;
        let mut samples = Vec::new();
        for entry in report.reports.values() {
            if let Ok(value) = serde_json::to_value(entry) {
                if let Ok(sample) = serde_json::from_value::<StatsSample>(value) {
                    samples.push(sample);
                }
            }
        }
        Ok(samples)
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        map_ice_state(self.pc.ice_connection_state())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Unspecified,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close connection: {}", e)))
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::Unspecified,
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    result.map_err(|e| Error::SdpError(format!("Invalid session description: {}", e)))
}

/// [`DataChannelHandle`] over an `RTCDataChannel`
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
}

impl std::fmt::Debug for RtcDataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcDataChannel")
            .field("label", &self.dc.label())
            .finish()
    }
}

#[async_trait]
impl DataChannelHandle for RtcDataChannel {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.dc
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send text: {}", e)))?;
        Ok(())
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.dc
            .send(&Bytes::from(data.to_vec()))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send binary: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))
    }
}

/// [`EngineFactory`] producing [`RtcEngine`]s
#[derive(Debug, Default)]
pub struct RtcEngineFactory;

impl RtcEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create_engine(
        &self,
        stream_id: &str,
        _role: SessionRole,
        ice_servers: Vec<crate::config::IceServer>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn PeerConnectionEngine>> {
        let engine = RtcEngine::new(stream_id, ice_servers, events).await?;
        Ok(Arc::new(engine))
    }
}
