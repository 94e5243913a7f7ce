/// Transport abstraction underneath the framed protocol
use std::fmt::Debug;

use thiserror::Error;

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// Frame could not be parsed into a protocol message
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// 消息序列化错误
    #[error("Message serialization error: {0}")]
    Serialization(String),
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Sending half of a message-oriented duplex channel.
#[async_trait::async_trait]
pub trait FrameSender: Send {
    /// Send one complete text frame.
    async fn send_frame(&mut self, frame: String) -> ConnectionResult<()>;

    /// Close the underlying channel.
    async fn close(&mut self) -> ConnectionResult<()>;
}

/// Receiving half of a message-oriented duplex channel.
#[async_trait::async_trait]
pub trait FrameReceiver: Send {
    /// Receive the payload of one complete frame.
    /// Returns None when the peer closed the channel.
    async fn recv_frame(&mut self) -> Option<ConnectionResult<Vec<u8>>>;
}

/// An already-established duplex message channel to one viewer.
///
/// How the channel was set up (WebSocket upgrade, in-process pipe, ...) is the
/// implementor's business; the protocol layer only needs the two halves.
pub trait TerminalTransport: Send + Debug {
    /// Human readable peer address, used in logs.
    fn address(&self) -> String;

    /// Split into independently usable send and receive halves.
    fn split(self: Box<Self>) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>);
}
