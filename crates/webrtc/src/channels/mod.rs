//! Data-channel message protocol

mod messenger;

pub use messenger::{sanitize_text, DataChannelMessenger, CHUNK_SIZE};
