/// PTY (Pseudo Terminal) handling for tty_relay
/// This module provides a trait abstraction over a command running on a pseudo-terminal,
/// plus the factory that spawns one.
mod mock_pty;
mod portable_pty_impl;
mod pty_trait;

// Export all public types and traits
pub use mock_pty::{KILLED_EXIT_CODE, MockPty, MockPtyFactory, MockSignal};
pub use portable_pty_impl::{PortablePty, PortablePtyFactory};
pub use pty_trait::*;

/// Best-effort size of the terminal this server was started from.
///
/// Returns `None` when stdout is not a terminal (daemonised, piped, under test).
pub fn host_win_size() -> Option<WinSize> {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => Some(WinSize::new(rows, cols)),
        _ => None,
    }
}
