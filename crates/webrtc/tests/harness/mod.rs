//! Mock collaborators for orchestrator integration tests
//!
//! The signaling channel records every wire command and lets tests inject
//! inbound frames; the engine factory hands out scriptable engines whose
//! events tests can emit at will.

#![allow(dead_code)]

use async_trait::async_trait;
use peerstream_webrtc::config::IceServer;
use peerstream_webrtc::events::{StreamError, StreamEvent};
use peerstream_webrtc::media::{StaticMediaProvider, TrackFlags};
use peerstream_webrtc::peer::{
    DataChannelHandle, EngineEvent, EngineFactory, IceCandidate, IceConnectionState,
    PeerConnectionEngine, SessionDescription, SessionRole, SignalingState,
};
use peerstream_webrtc::signaling::{ChannelFactory, SignalingChannel, TransportEvent};
use peerstream_webrtc::stats::StatsSample;
use peerstream_webrtc::{AdaptorConfig, Error, Result, SignalingOrchestrator};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ----------------------------------------------------------------------
// Signaling channel mock
// ----------------------------------------------------------------------

#[derive(Default)]
pub struct MockChannelState {
    connected: AtomicBool,
    connecting: AtomicBool,
    fail_connect: AtomicBool,
    pub connect_calls: AtomicUsize,
    sent: parking_lot::Mutex<Vec<Value>>,
    events: parking_lot::Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockChannelState {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn emit(&self, event: TransportEvent) {
        let guard = self.events.lock();
        let sender = guard.as_ref().expect("channel was never created");
        sender.send(event).expect("dispatch loop is gone");
    }

    /// Every command sent over the channel, parsed
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Commands with the given `command` tag
    pub fn sent_named(&self, name: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|v| v["command"] == name)
            .cloned()
            .collect()
    }
}

pub struct MockSignalingChannel {
    state: Arc<MockChannelState>,
}

#[async_trait]
impl SignalingChannel for MockSignalingChannel {
    async fn connect(&self) -> Result<()> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::WebSocketError("mock connect failure".to_string()));
        }
        self.state.set_connected(true);
        self.state.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::WebSocketError(
                "mock channel is not connected".to_string(),
            ));
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| Error::SerializationError(e.to_string()))?;
        self.state.sent.lock().push(value);
        Ok(())
    }

    async fn close(&self) {
        self.state.set_connected(false);
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn is_connecting(&self) -> bool {
        self.state.connecting.load(Ordering::SeqCst)
    }
}

pub struct MockChannelFactory {
    pub state: Arc<MockChannelState>,
}

impl ChannelFactory for MockChannelFactory {
    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<dyn SignalingChannel> {
        *self.state.events.lock() = Some(events);
        Arc::new(MockSignalingChannel {
            state: Arc::clone(&self.state),
        })
    }
}

// ----------------------------------------------------------------------
// Engine mock
// ----------------------------------------------------------------------

pub struct MockEngine {
    pub stream_id: String,
    events: mpsc::UnboundedSender<EngineEvent>,
    pub applied_candidates: parking_lot::Mutex<Vec<IceCandidate>>,
    pub remote_descriptions: parking_lot::Mutex<Vec<SessionDescription>>,
    pub local_descriptions: parking_lot::Mutex<Vec<SessionDescription>>,
    pub ice_state: parking_lot::Mutex<IceConnectionState>,
    pub fail_remote_description: AtomicBool,
    pub closed: AtomicBool,
    pub stats_samples: parking_lot::Mutex<Vec<StatsSample>>,
    pub data_channels: parking_lot::Mutex<Vec<Arc<MockDataChannel>>>,
}

impl MockEngine {
    fn new(stream_id: &str, events: mpsc::UnboundedSender<EngineEvent>, fail_remote: bool) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            events,
            applied_candidates: parking_lot::Mutex::new(Vec::new()),
            remote_descriptions: parking_lot::Mutex::new(Vec::new()),
            local_descriptions: parking_lot::Mutex::new(Vec::new()),
            ice_state: parking_lot::Mutex::new(IceConnectionState::New),
            fail_remote_description: AtomicBool::new(fail_remote),
            closed: AtomicBool::new(false),
            stats_samples: parking_lot::Mutex::new(Vec::new()),
            data_channels: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Emit an engine event as the native engine would
    pub fn emit(&self, event: EngineEvent) {
        self.events.send(event).expect("dispatch loop is gone");
    }

    /// Set the ICE state and emit the matching state-change event
    pub fn emit_ice_state(&self, state: IceConnectionState) {
        *self.ice_state.lock() = state;
        self.emit(EngineEvent::IceConnectionStateChange {
            stream_id: self.stream_id.clone(),
            state,
        });
    }

    pub fn set_ice_state(&self, state: IceConnectionState) {
        *self.ice_state.lock() = state;
    }

    pub fn data_channel(&self, index: usize) -> Arc<MockDataChannel> {
        Arc::clone(&self.data_channels.lock()[index])
    }
}

#[async_trait]
impl PeerConnectionEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!(
            "v=0 mock-offer {}",
            self.stream_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer {}",
            self.stream_id
        )))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.local_descriptions.lock().push(desc.clone());
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(Error::SdpError(
                "mock codec incompatibility while setting remote description".to_string(),
            ));
        }
        self.remote_descriptions.lock().push(desc.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.applied_candidates.lock().push(candidate.clone());
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelHandle>> {
        let channel = Arc::new(MockDataChannel::new(label));
        self.data_channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }

    async fn sender_kinds(&self) -> Vec<String> {
        Vec::new()
    }

    async fn get_stats(&self) -> Result<Vec<StatsSample>> {
        Ok(self.stats_samples.lock().clone())
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        *self.ice_state.lock()
    }

    fn signaling_state(&self) -> SignalingState {
        SignalingState::Stable
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockDataChannel {
    label: String,
    pub open: AtomicBool,
    pub closed: AtomicBool,
    pub sent_text: parking_lot::Mutex<Vec<String>>,
    pub sent_binary: parking_lot::Mutex<Vec<Vec<u8>>>,
}

impl MockDataChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            sent_text: parking_lot::Mutex::new(Vec::new()),
            sent_binary: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DataChannelHandle for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        self.sent_text.lock().push(text.to_string());
        Ok(())
    }

    async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.sent_binary.lock().push(data.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEngineFactory {
    pub engines: parking_lot::Mutex<Vec<Arc<MockEngine>>>,
    pub fail_remote_description: AtomicBool,
    pub servers_seen: parking_lot::Mutex<Vec<Vec<IceServer>>>,
}

impl MockEngineFactory {
    /// Most recent engine created for the stream id
    pub fn engine_for(&self, stream_id: &str) -> Arc<MockEngine> {
        self.engines
            .lock()
            .iter()
            .rev()
            .find(|e| e.stream_id == stream_id)
            .cloned()
            .expect("no engine created for stream")
    }

    pub fn create_count(&self, stream_id: &str) -> usize {
        self.engines
            .lock()
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .count()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create_engine(
        &self,
        stream_id: &str,
        _role: SessionRole,
        ice_servers: Vec<IceServer>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn PeerConnectionEngine>> {
        self.servers_seen.lock().push(ice_servers);
        let engine = Arc::new(MockEngine::new(
            stream_id,
            events,
            self.fail_remote_description.load(Ordering::SeqCst),
        ));
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

pub struct Harness {
    pub adaptor: SignalingOrchestrator,
    pub channel: Arc<MockChannelState>,
    pub factory: Arc<MockEngineFactory>,
    events: Arc<parking_lot::Mutex<Vec<StreamEvent>>>,
    errors: Arc<parking_lot::Mutex<Vec<StreamError>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AdaptorConfig::new("ws://localhost:5080/app/websocket"))
    }

    pub fn with_config(config: AdaptorConfig) -> Self {
        init_tracing();

        let channel = Arc::new(MockChannelState::default());
        let factory = Arc::new(MockEngineFactory::default());

        let adaptor = SignalingOrchestrator::with_components(
            config,
            &MockChannelFactory {
                state: Arc::clone(&channel),
            },
            Arc::clone(&factory) as Arc<dyn EngineFactory>,
            Arc::new(StaticMediaProvider::new(TrackFlags::new(true, true))),
        );

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let errors = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = Arc::clone(&events);
        adaptor.add_listener(move |event| {
            sink.lock().push(event.clone());
        });
        let sink = Arc::clone(&errors);
        adaptor.add_error_listener(move |error| {
            sink.lock().push(error.clone());
        });

        Self {
            adaptor,
            channel,
            factory,
            events,
            errors,
        }
    }

    /// Bring the mock channel up, as a successful dial would
    pub fn connect(&self) {
        self.channel.set_connected(true);
        self.channel.emit(TransportEvent::Connected);
    }

    /// Inject one inbound signaling frame
    pub fn inject(&self, message: Value) {
        self.channel.emit(TransportEvent::Message(message.to_string()));
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn errors(&self) -> Vec<StreamError> {
        self.errors.lock().clone()
    }

    pub fn error_names(&self) -> Vec<String> {
        self.errors
            .lock()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }
}

/// Let the dispatch task drain its queues without advancing time
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Initialize test logging once; set RUST_LOG to see orchestrator traces
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
