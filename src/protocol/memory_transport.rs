/// In-process transport used to attach viewers without a network socket.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::{
    ConnectionError, ConnectionResult, FrameReceiver, FrameSender, TerminalTransport, TtyMessage,
};

/// Transport end handed to the session, see [`MemoryTransport::pair`].
#[derive(Debug)]
pub struct MemoryTransport {
    address: String,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

/// The viewer's side of a [`MemoryTransport`].
pub struct MemoryPeer {
    inbound_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    closes: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn pair(address: &str) -> (MemoryTransport, MemoryPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(AtomicUsize::new(0));
        (
            MemoryTransport {
                address: address.to_string(),
                inbound_rx,
                outbound_tx,
                closes: closes.clone(),
            },
            MemoryPeer {
                inbound_tx: Some(inbound_tx),
                outbound_rx,
                closes,
            },
        )
    }
}

impl TerminalTransport for MemoryTransport {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameSender>, Box<dyn FrameReceiver>) {
        let this = *self;
        (
            Box::new(MemorySender {
                outbound_tx: Some(this.outbound_tx),
                closes: this.closes,
            }),
            Box::new(MemoryReceiver {
                inbound_rx: this.inbound_rx,
            }),
        )
    }
}

struct MemorySender {
    outbound_tx: Option<mpsc::UnboundedSender<String>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl FrameSender for MemorySender {
    async fn send_frame(&mut self, frame: String) -> ConnectionResult<()> {
        let tx = self.outbound_tx.as_ref().ok_or(ConnectionError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| ConnectionError::ConnectionClosed)
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.outbound_tx.take();
        Ok(())
    }
}

struct MemoryReceiver {
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait::async_trait]
impl FrameReceiver for MemoryReceiver {
    async fn recv_frame(&mut self) -> Option<ConnectionResult<Vec<u8>>> {
        self.inbound_rx.recv().await.map(Ok)
    }
}

impl MemoryPeer {
    /// Send a typed message to the session.
    pub fn send(&self, message: &TtyMessage) {
        if let Ok(frame) = message.encode() {
            self.send_raw(frame.as_bytes());
        }
    }

    /// Send an arbitrary frame, well-formed or not.
    pub fn send_raw(&self, frame: &[u8]) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(frame.to_vec());
        }
    }

    /// Stop sending; the session side observes end of stream.
    pub fn hang_up(&mut self) {
        self.inbound_tx.take();
    }

    /// Next message sent by the session, or None once the session closed the channel.
    pub async fn next_message(&mut self) -> Option<TtyMessage> {
        loop {
            let frame = self.outbound_rx.recv().await?;
            if let Ok(message) = TtyMessage::decode(frame.as_bytes()) {
                return Some(message);
            }
        }
    }

    /// Collect terminal output until it contains `needle`, the channel closes or
    /// `timeout` elapses. Returns everything collected.
    pub async fn output_until(&mut self, needle: &[u8], timeout: Duration) -> Vec<u8> {
        let mut output = Vec::new();
        let _ = tokio::time::timeout(timeout, async {
            while !contains(&output, needle) {
                match self.next_message().await {
                    Some(TtyMessage::Write(data)) => output.extend_from_slice(&data),
                    Some(_) => {}
                    None => break,
                }
            }
        })
        .await;
        output
    }

    /// Drain every message already queued without waiting.
    pub fn drain(&mut self) -> Vec<TtyMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            if let Ok(message) = TtyMessage::decode(frame.as_bytes()) {
                messages.push(message);
            }
        }
        messages
    }

    /// How many times the session closed its end.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
