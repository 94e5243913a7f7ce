/// Framed protocol connection layered over a [`TerminalTransport`]
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
    ConnectionError, ConnectionResult, FrameReceiver, FrameSender, TerminalTransport, TtyMessage,
};

/// How long [`ProtocolConnection::close`] waits for the transport to shut down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// One attached viewer.
///
/// The send and receive halves are locked separately, so output forwarding and the
/// control-message reader never wait on each other. Once [`close`](Self::close) has
/// been called every pending and future read or write fails with
/// [`ConnectionError::ConnectionClosed`].
pub struct ProtocolConnection {
    id: String,
    address: String,
    sender: Mutex<Box<dyn FrameSender>>,
    receiver: Mutex<Box<dyn FrameReceiver>>,
    closed: CancellationToken,
    close_started: AtomicBool,
}

impl Debug for ProtocolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProtocolConnection {
    pub fn new(transport: Box<dyn TerminalTransport>) -> Self {
        let address = transport.address();
        let (sender, receiver) = transport.split();
        Self {
            id: Uuid::new_v4().to_string(),
            address,
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Block until the next complete control message arrives.
    pub async fn read_message(&self) -> ConnectionResult<TtyMessage> {
        let frame = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(ConnectionError::ConnectionClosed),
            frame = async {
                let mut receiver = self.receiver.lock().await;
                receiver.recv_frame().await
            } => frame,
        };

        match frame {
            Some(Ok(frame)) => {
                let message = TtyMessage::decode(&frame)?;
                trace!("Connection {} received {} message", self.id, message.kind());
                Ok(message)
            }
            Some(Err(e)) => Err(e),
            None => Err(ConnectionError::ConnectionClosed),
        }
    }

    /// Forward terminal output to the viewer. Returns the number of bytes accepted.
    pub async fn write(&self, data: &[u8]) -> ConnectionResult<usize> {
        self.send_message(&TtyMessage::Write(data.to_vec())).await?;
        Ok(data.len())
    }

    /// Send one typed message to the viewer.
    pub async fn send_message(&self, message: &TtyMessage) -> ConnectionResult<()> {
        let frame = message.encode()?;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(ConnectionError::ConnectionClosed),
            result = async {
                let mut sender = self.sender.lock().await;
                sender.send_frame(frame).await
            } => result,
        }
    }

    /// Close the connection. Only the first call reaches the transport.
    ///
    /// A transport that does not finish closing within a second is abandoned; the
    /// connection counts as closed either way.
    pub async fn close(&self) -> ConnectionResult<()> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing connection {} ({})", self.id, self.address);
        // Wake readers and writers first so the sender lock becomes free.
        self.closed.cancel();
        let shutdown = async {
            let mut sender = self.sender.lock().await;
            sender.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("transport of {} did not close in time", self.address),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn reads_messages_in_order() {
        let (transport, peer) = MemoryTransport::pair("peer");
        let conn = ProtocolConnection::new(Box::new(transport));

        peer.send(&TtyMessage::WinSize { rows: 40, cols: 120 });
        peer.send(&TtyMessage::Write(b"ls\n".to_vec()));

        assert_eq!(
            conn.read_message().await.unwrap(),
            TtyMessage::WinSize { rows: 40, cols: 120 }
        );
        assert_eq!(conn.read_message().await.unwrap(), TtyMessage::Write(b"ls\n".to_vec()));
    }

    #[tokio::test]
    async fn write_frames_output() {
        let (transport, mut peer) = MemoryTransport::pair("peer");
        let conn = ProtocolConnection::new(Box::new(transport));

        assert_eq!(conn.write(b"hello").await.unwrap(), 5);
        assert_eq!(peer.next_message().await, Some(TtyMessage::Write(b"hello".to_vec())));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_wakes_reader() {
        let (transport, peer) = MemoryTransport::pair("peer");
        let conn = std::sync::Arc::new(ProtocolConnection::new(Box::new(transport)));

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_message().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.close().await.unwrap();
        conn.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(ConnectionError::ConnectionClosed)));
        assert!(matches!(conn.write(b"x").await, Err(ConnectionError::ConnectionClosed)));
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn peer_hangup_is_connection_closed() {
        let (transport, peer) = MemoryTransport::pair("peer");
        let conn = ProtocolConnection::new(Box::new(transport));
        drop(peer);
        assert!(matches!(conn.read_message().await, Err(ConnectionError::ConnectionClosed)));
    }

    struct StuckTransport;

    impl std::fmt::Debug for StuckTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("StuckTransport")
        }
    }

    struct StuckSender;

    #[async_trait::async_trait]
    impl FrameSender for StuckSender {
        async fn send_frame(&mut self, _frame: String) -> ConnectionResult<()> {
            Ok(())
        }

        async fn close(&mut self) -> ConnectionResult<()> {
            std::future::pending().await
        }
    }

    struct SilentReceiver;

    #[async_trait::async_trait]
    impl FrameReceiver for SilentReceiver {
        async fn recv_frame(&mut self) -> Option<ConnectionResult<Vec<u8>>> {
            std::future::pending().await
        }
    }

    impl TerminalTransport for StuckTransport {
        fn address(&self) -> String {
            "stuck".to_string()
        }

        fn split(self: Box<Self>) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
            (Box::new(StuckSender), Box::new(SilentReceiver))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_gives_up_on_a_stuck_transport() {
        let conn = ProtocolConnection::new(Box::new(StuckTransport));

        let result = conn.close().await;

        assert!(matches!(result, Err(ConnectionError::Io(_))));
        assert!(conn.is_closed());
        assert!(matches!(conn.read_message().await, Err(ConnectionError::ConnectionClosed)));
        // Later calls do not wait again.
        conn.close().await.unwrap();
    }
}
