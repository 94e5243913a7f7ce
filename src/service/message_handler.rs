/// Message handler for processing viewer control messages
use tracing::{debug, warn};

use crate::protocol::TtyMessage;
use crate::service::PtySession;

/// Applies one decoded control message to a session
#[derive(Debug, Default)]
pub struct MessageHandler;

impl MessageHandler {
    /// Create a new message handler
    pub fn new() -> Self {
        Self
    }

    /// Handle a control message. Nothing here ends the viewer's connection.
    pub async fn handle_message(&self, session: &PtySession, message: TtyMessage) {
        match message {
            TtyMessage::WinSize { rows, cols } => {
                debug!("Viewer resized session {} to {}x{}", session.id(), cols, rows);
                session.set_win_size(rows, cols).await;
            }
            TtyMessage::Write(data) => {
                if let Err(e) = session.write(&data).await {
                    warn!("Failed to write {} bytes to session {}: {}", data.len(), session.id(), e);
                }
            }
            other => {
                warn!("Receiving unknown data from the receiver: {:?}", other.kind());
            }
        }
    }
}
