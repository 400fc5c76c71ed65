//! axum `WebSocket` adapter.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::{FrameReader, FrameWriter, Transport};
use crate::errors::TransportError;

/// Read half of an upgraded socket.
pub struct WsReader(SplitStream<WebSocket>);

/// Write half of an upgraded socket.
pub struct WsWriter(SplitSink<WebSocket, Message>);

/// Split an upgraded socket into a [`Transport`].
pub fn transport(socket: WebSocket) -> Transport {
    let (tx, rx) = socket.split();
    Transport::new(WsReader(rx), WsWriter(tx))
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(msg) = self.0.next().await else {
                return Ok(None);
            };
            match msg.map_err(|e| TransportError::WebSocket(e.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                // some clients send JSON as binary frames
                Message::Binary(data) => {
                    return String::from_utf8(data.to_vec())
                        .map(Some)
                        .map_err(|e| TransportError::InvalidFrame(e.to_string()));
                }
                Message::Close(_) => {
                    debug!("client sent close frame");
                    return Ok(None);
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
