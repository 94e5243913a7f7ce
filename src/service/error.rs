/// Error types for the service layer
use thiserror::Error;

use crate::pty::PtyError;

/// Session layer error type
#[derive(Error, Debug)]
pub enum SessionError {
    /// The command could not be launched or the pty could not be allocated
    #[error("Failed to spawn session {id}: {source}")]
    Spawn {
        id: String,
        #[source]
        source: PtyError,
    },

    /// Another live session already owns this id
    #[error("Session {0} already exists")]
    DuplicateSession(String),

    /// PTY error after the session started
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),
}
