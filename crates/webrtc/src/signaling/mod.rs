//! Signaling transport abstraction and the WebSocket implementation

mod websocket;

pub use websocket::{WebSocketChannel, WebSocketChannelFactory};

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Lifecycle and traffic events emitted by a signaling channel
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection established; commands may be sent
    Connected,
    /// One inbound text frame
    Message(String),
    /// Connection closed or failed. Transient: recovery is the
    /// reconnection supervisor's decision, not the transport's.
    Closed,
}

/// The signaling transport consumed by the orchestrator
///
/// Implementations deliver [`TransportEvent`]s over the sender handed to
/// them at construction and never invoke the orchestrator directly.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Establish the connection and start pumping events
    async fn connect(&self) -> Result<()>;

    /// Send one text frame
    async fn send(&self, text: String) -> Result<()>;

    /// Close the connection and stop background tasks
    async fn close(&self);

    fn is_connected(&self) -> bool;

    fn is_connecting(&self) -> bool;
}

/// Creates the signaling channel for an orchestrator instance
pub trait ChannelFactory: Send + Sync {
    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> std::sync::Arc<dyn SignalingChannel>;
}
