/// Framed viewer protocol for tty_relay
mod connection;
mod memory_transport;
mod message;
mod protocol_connection;
mod websocket_connection;

pub use connection::{
    ConnectionError, ConnectionResult, FrameReceiver, FrameSender, TerminalTransport,
};
pub use memory_transport::{MemoryPeer, MemoryTransport};
pub use message::{MSG_TERMINATE, MSG_WIN_SIZE, MSG_WRITE, TtyMessage};
pub use protocol_connection::ProtocolConnection;
pub use websocket_connection::WebSocketTransport;
