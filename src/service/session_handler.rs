/// Attachment of a viewer connection to a running session
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::protocol::{ProtocolConnection, TerminalTransport};
use crate::service::{MessageHandler, PtySession};

impl PtySession {
    /// Serve one viewer until its connection fails or closes.
    ///
    /// The viewer joins the broadcast set, gets a redraw nudge, and then its control
    /// messages are applied to the terminal in arrival order. Always returns `true`
    /// once the connection has been detached and closed.
    pub async fn handle_receiver(self: &Arc<Self>, transport: Box<dyn TerminalTransport>) -> bool {
        let span = info_span!(parent: self.span(), "receiver", address = %transport.address());
        Arc::clone(self).serve_receiver(transport).instrument(span).await
    }

    async fn serve_receiver(self: Arc<Self>, transport: Box<dyn TerminalTransport>) -> bool {
        let conn = Arc::new(ProtocolConnection::new(transport));
        debug!("Got new receiver connection ({}). Serving it..", conn.address());

        let Some(output) = self.attach(conn.clone()).await else {
            info!("Session {} is shutting down, turning receiver away", self.id());
            let _ = conn.close().await;
            return true;
        };

        let forwarder = tokio::spawn(forward_output(output, conn.clone()).in_current_span());

        let _ = self.refresh().await;

        let handler = MessageHandler::new();
        loop {
            match conn.read_message().await {
                Ok(message) => handler.handle_message(&self, message).await,
                Err(e) => {
                    warn!("Finishing handling the receiver loop because: {}", e);
                    break;
                }
            }
        }

        debug!("Closing receiver connection");
        self.detach(&conn).await;
        if let Err(e) = conn.close().await {
            debug!("Receiver close failed: {}", e);
        }
        forwarder.abort();
        // The output subscription must be gone before we report the viewer as done.
        let _ = forwarder.await;
        true
    }
}

/// Copy broadcast output into one connection until either side gives up.
async fn forward_output(mut output: broadcast::Receiver<Bytes>, conn: Arc<ProtocolConnection>) {
    loop {
        let chunk = tokio::select! {
            _ = conn.closed() => break,
            chunk = output.recv() => chunk,
        };
        match chunk {
            Ok(chunk) => {
                if let Err(e) = conn.write(&chunk).await {
                    debug!("Lost connection with the receiver: {}", e);
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Receiver fell {} chunks behind, dropping it", skipped);
                break;
            }
            Err(RecvError::Closed) => break,
        }
    }
    // Wakes the control loop so the viewer is detached.
    let _ = conn.close().await;
}
