//! Frame transport between a session and its client.
//!
//! A session only needs to read and write whole text frames. The axum
//! `WebSocket` is adapted in [`ws`]; [`channel`] provides an in-process pair
//! for embedding and tests.

use async_trait::async_trait;

use crate::errors::TransportError;

pub mod channel;
pub mod ws;

pub use channel::{ChannelPeer, channel_pair};

/// Read half of a client connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Next text frame. `Ok(None)` means the peer closed the connection.
    ///
    /// Must be cancel-safe: a dropped call loses no frame.
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError>;
}

/// Write half of a client connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Both halves of one client connection.
pub struct Transport {
    /// Inbound frames.
    pub reader: Box<dyn FrameReader>,
    /// Outbound frames.
    pub writer: Box<dyn FrameWriter>,
}

impl Transport {
    /// Bundle a reader and writer.
    pub fn new(reader: impl FrameReader + 'static, writer: impl FrameWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}
