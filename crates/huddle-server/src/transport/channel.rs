//! In-process transport backed by `tokio::sync::mpsc` channels.
//!
//! [`channel_pair`] returns the server-side [`Transport`] and the client-side
//! [`ChannelPeer`]. Dropping the peer (or calling [`ChannelPeer::disconnect`])
//! looks like a client disconnect to the session.

use async_trait::async_trait;
use huddle_core::Message;
use tokio::sync::mpsc;

use super::{FrameReader, FrameWriter, Transport};
use crate::errors::TransportError;

struct ChannelReader {
    rx: mpsc::Receiver<String>,
}

struct ChannelWriter {
    tx: Option<mpsc::Sender<String>>,
}

/// Client end of an in-process connection.
pub struct ChannelPeer {
    tx: Option<mpsc::Sender<String>>,
    rx: mpsc::Receiver<String>,
}

/// Create a connected (server transport, client peer) pair.
pub fn channel_pair(capacity: usize) -> (Transport, ChannelPeer) {
    let (client_tx, server_rx) = mpsc::channel(capacity);
    let (server_tx, client_rx) = mpsc::channel(capacity);
    let transport = Transport::new(
        ChannelReader { rx: server_rx },
        ChannelWriter {
            tx: Some(server_tx),
        },
    );
    let peer = ChannelPeer {
        tx: Some(client_tx),
        rx: client_rx,
    };
    (transport, peer)
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

impl ChannelPeer {
    /// Send a raw text frame. Returns `false` once the server side is gone.
    pub async fn send_raw(&self, frame: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame.into()).await.is_ok(),
            None => false,
        }
    }

    /// Send a `{name, data}` envelope.
    pub async fn send(&self, message: &Message) -> bool {
        match message.to_json() {
            Ok(frame) => self.send_raw(frame).await,
            Err(_) => false,
        }
    }

    /// Next raw frame from the server; `None` once the server closed.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next envelope from the server. Frames that do not decode are skipped.
    pub async fn recv(&mut self) -> Option<Message> {
        while let Some(frame) = self.rx.recv().await {
            if let Ok(message) = Message::from_json(&frame) {
                return Some(message);
            }
        }
        None
    }

    /// Stop sending; the server sees end of stream.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut transport, mut peer) = channel_pair(4);
        assert!(peer.send(&Message::new("ping", json!(1))).await);
        let frame = transport.reader.read_frame().await.unwrap().unwrap();
        assert_eq!(Message::from_json(&frame).unwrap().name, "ping");

        transport
            .writer
            .write_frame(Message::new("pong", json!(2)).to_json().unwrap())
            .await
            .unwrap();
        let reply = peer.recv().await.unwrap();
        assert_eq!(reply.name, "pong");
        assert_eq!(reply.data, json!(2));
    }

    #[tokio::test]
    async fn peer_disconnect_ends_reader() {
        let (mut transport, mut peer) = channel_pair(4);
        peer.disconnect();
        assert!(transport.reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writer_close_ends_peer_stream() {
        let (mut transport, mut peer) = channel_pair(4);
        transport.writer.close().await.unwrap();
        transport.writer.close().await.unwrap();
        assert!(peer.recv_raw().await.is_none());
        assert_matches!(
            transport.writer.write_frame("x".into()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn write_after_peer_drop_fails() {
        let (mut transport, peer) = channel_pair(4);
        drop(peer);
        assert!(transport.writer.write_frame("x".into()).await.is_err());
    }
}
