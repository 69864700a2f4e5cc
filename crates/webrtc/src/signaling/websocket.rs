//! WebSocket signaling channel
//!
//! Connects to the media server, pumps inbound frames to the orchestrator
//! as [`TransportEvent`]s and keeps the connection alive with periodic
//! ping commands.

use super::{ChannelFactory, SignalingChannel, TransportEvent};
use crate::config::AdaptorConfig;
use crate::protocol::Command;
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket-backed [`SignalingChannel`]
pub struct WebSocketChannel {
    url: String,
    ping_period: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Create a channel for the given URL. Nothing is dialed until
    /// [`SignalingChannel::connect`] is called.
    pub fn new(
        url: &str,
        ping_period: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            url: url.to_string(),
            ping_period,
            events,
            tx: parking_lot::Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            connecting: Arc::new(AtomicBool::new(false)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Sender task: drains outgoing frames into the WebSocket sink
    async fn sender_task(
        mut write: futures_util::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        debug!("Sender task terminated");
    }

    /// Receiver task: forwards inbound text frames and reports closure
    async fn receiver_task(
        mut read: futures_util::stream::SplitStream<WsStream>,
        events: mpsc::UnboundedSender<TransportEvent>,
        connected: Arc<AtomicBool>,
        connecting: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed by server");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        connected.store(false, Ordering::SeqCst);
        connecting.store(false, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Closed);
        debug!("Receiver task terminated");
    }

    /// Keepalive task: sends a ping command on a fixed period
    async fn ping_task(tx: mpsc::UnboundedSender<Message>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so pings start one
        // period after connect.
        interval.tick().await;
        loop {
            interval.tick().await;
            let frame = match Command::Ping.to_json() {
                Ok(json) => json,
                Err(_) => break,
            };
            if tx.send(Message::Text(frame)).is_err() {
                break;
            }
        }
        debug!("Ping task terminated");
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn connect(&self) -> Result<()> {
        self.connecting.store(true, Ordering::SeqCst);
        info!("Connecting to signaling server: {}", self.url);

        let (ws_stream, _) = connect_async(&self.url).await.map_err(|e| {
            self.connecting.store(false, Ordering::SeqCst);
            Error::WebSocketError(format!("Failed to connect: {}", e))
        })?;

        info!("Connected to signaling server");

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(Self::sender_task(write, rx)));
        tasks.push(tokio::spawn(Self::receiver_task(
            read,
            self.events.clone(),
            Arc::clone(&self.connected),
            Arc::clone(&self.connecting),
        )));
        tasks.push(tokio::spawn(Self::ping_task(tx.clone(), self.ping_period)));

        *self.tx.lock() = Some(tx);
        {
            let mut slot = self.tasks.lock();
            for task in slot.drain(..) {
                task.abort();
            }
            *slot = tasks;
        }

        self.connected.store(true, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);

        Ok(())
    }

    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() && !self.is_connecting() {
            return Err(Error::WebSocketError(
                "Cannot send message, channel is not connected".to_string(),
            ));
        }

        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| Error::WebSocketError("Channel was never connected".to_string()))?;

        tx.send(Message::Text(text))
            .map_err(|e| Error::WebSocketError(format!("Failed to queue message: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);

        if let Some(tx) = self.tx.lock().take() {
            if tx.send(Message::Close(None)).is_err() {
                warn!("WebSocket already gone while closing");
            }
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }
}

/// Factory producing [`WebSocketChannel`]s from the orchestrator config
pub struct WebSocketChannelFactory {
    config: Arc<AdaptorConfig>,
}

impl WebSocketChannelFactory {
    pub fn new(config: Arc<AdaptorConfig>) -> Self {
        Self { config }
    }
}

impl ChannelFactory for WebSocketChannelFactory {
    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<dyn SignalingChannel> {
        Arc::new(WebSocketChannel::new(
            &self.config.websocket_url,
            self.config.ping_period,
            events,
        ))
    }
}
