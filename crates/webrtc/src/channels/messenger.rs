//! Chunking and reassembly for large data-channel messages
//!
//! Text payloads travel as single frames. Binary payloads are split: a
//! header frame of two little-endian i32 values `[token, total_len]`
//! followed by data frames of a 4-byte token prefix plus up to
//! [`CHUNK_SIZE`] payload bytes. The receiver reassembles per token and
//! delivers each message exactly once, when the received byte count equals
//! the declared size.

use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

/// Maximum payload bytes per data frame
pub const CHUNK_SIZE: usize = 16000;

/// Bytes of the token prefix on every data frame
const TOKEN_PREFIX_LEN: usize = 4;

/// Bytes of the header frame (token + declared length)
const HEADER_LEN: usize = 8;

/// Reassembly state for one in-flight message
#[derive(Debug)]
struct ReceivingMessage {
    size: usize,
    received: usize,
    data: Vec<u8>,
}

impl ReceivingMessage {
    fn new(size: usize) -> Self {
        Self {
            size,
            received: 0,
            data: vec![0u8; size],
        }
    }
}

/// Chunking/reassembly state for one data channel
#[derive(Debug, Default)]
pub struct DataChannelMessenger {
    receiving: HashMap<i32, ReceivingMessage>,
}

impl DataChannelMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a binary payload into wire frames with a random token.
    ///
    /// Tokens are client-chosen and not defended against collision between
    /// concurrently in-flight messages.
    pub fn split_binary(data: &[u8]) -> Vec<Vec<u8>> {
        let token = rand::thread_rng().gen_range(0..999_999);
        Self::split_binary_with_token(token, data)
    }

    /// Split a binary payload into wire frames using the given token
    pub fn split_binary_with_token(token: i32, data: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(1 + data.len().div_ceil(CHUNK_SIZE));

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&token.to_le_bytes());
        header.extend_from_slice(&(data.len() as i32).to_le_bytes());
        frames.push(header);

        let mut sent = 0;
        while sent < data.len() {
            let size = (data.len() - sent).min(CHUNK_SIZE);
            let mut frame = Vec::with_capacity(size + TOKEN_PREFIX_LEN);
            frame.extend_from_slice(&token.to_le_bytes());
            frame.extend_from_slice(&data[sent..sent + size]);
            sent += size;
            frames.push(frame);
        }

        frames
    }

    /// Feed one inbound binary frame.
    ///
    /// The first frame seen for an unknown token is interpreted as the
    /// header and allocates the buffer; it carries no payload. Returns the
    /// completed message once the declared size has been received.
    pub fn accept_binary(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if frame.len() < TOKEN_PREFIX_LEN {
            debug!("Dropping undersized data channel frame: {} bytes", frame.len());
            return None;
        }

        let token = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);

        let msg = match self.receiving.get_mut(&token) {
            Some(msg) => msg,
            None => {
                if frame.len() < HEADER_LEN {
                    debug!("Dropping undersized header frame for token {}", token);
                    return None;
                }
                let size = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
                if size < 0 {
                    debug!("Dropping header with negative size for token {}", token);
                    return None;
                }
                if frame.len() > HEADER_LEN {
                    debug!("Unexpected payload in header frame for token {}", token);
                }
                self.receiving.insert(token, ReceivingMessage::new(size as usize));
                return None;
            }
        };

        let payload = &frame[TOKEN_PREFIX_LEN..];
        let end = (msg.received + payload.len()).min(msg.size);
        let take = end - msg.received;
        msg.data[msg.received..end].copy_from_slice(&payload[..take]);
        msg.received += take;

        if msg.received == msg.size {
            let msg = self.receiving.remove(&token)?;
            return Some(msg.data);
        }

        None
    }

    /// Number of messages currently being reassembled
    pub fn in_flight(&self) -> usize {
        self.receiving.len()
    }
}

/// HTML-escape a text payload that may carry markup
pub fn sanitize_text(text: &str) -> String {
    if text.contains("script") {
        text.replace('<', "&lt;").replace('>', "&gt;")
    } else {
        text.to_string()
    }
}
