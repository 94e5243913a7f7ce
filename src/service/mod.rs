/// Service layer for terminal session management
/// Sessions own a pty and their attached viewers; the registry owns the sessions.
mod error;
mod message_handler;
mod pty_session;
mod session_handler;
mod session_registry;

// Re-export public types and functions
pub use error::SessionError;
pub use message_handler::MessageHandler;
pub use pty_session::{PtySession, SessionOptions};
pub use session_registry::{SessionEvent, SessionRegistry};
