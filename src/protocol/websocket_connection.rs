/// WebSocket transport for the framed protocol
use std::fmt::Debug;

use axum::extract::ws::Message::{Binary, Close, Ping, Pong, Text};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error};

use crate::protocol::{
    ConnectionError, ConnectionResult, FrameReceiver, FrameSender, TerminalTransport,
};

/// An upgraded WebSocket carrying one viewer
pub struct WebSocketTransport {
    pub socket: WebSocket,
    pub address: String,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket, address: impl Into<String>) -> Self {
        Self {
            socket,
            address: address.into(),
        }
    }
}

impl Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("address", &self.address)
            .finish()
    }
}

impl TerminalTransport for WebSocketTransport {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WebSocketSender { sink }),
            Box::new(WebSocketReceiver { stream }),
        )
    }
}

struct WebSocketSender {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl FrameSender for WebSocketSender {
    async fn send_frame(&mut self, frame: String) -> ConnectionResult<()> {
        self.sink
            .send(Text(frame))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        // The peer may already be gone; a failed close frame is not worth reporting.
        if let Err(e) = self.sink.send(Close(None)).await {
            debug!("WebSocket close frame not delivered: {}", e);
        }
        self.sink
            .close()
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }
}

struct WebSocketReceiver {
    stream: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl FrameReceiver for WebSocketReceiver {
    async fn recv_frame(&mut self) -> Option<ConnectionResult<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Text(text))) => return Some(Ok(text.into_bytes())),
                Some(Ok(Binary(bin))) => return Some(Ok(bin)),
                // axum answers pings on its own
                Some(Ok(Ping(_))) | Some(Ok(Pong(_))) => continue,
                Some(Ok(Close(_))) => {
                    debug!("WebSocket received close message");
                    return None;
                }
                Some(Err(e)) => {
                    error!("WebSocket receive error: {}", e);
                    return Some(Err(ConnectionError::WebSocket(e.to_string())));
                }
                None => {
                    debug!("WebSocket connection closed");
                    return None;
                }
            }
        }
    }
}
