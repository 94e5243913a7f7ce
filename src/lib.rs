//! tty_relay: share a terminal session with any number of WebSocket viewers.
//!
//! A session owns one pseudo-terminal running a command. Every viewer attached to
//! the session sees the same output and may type into it or resize it.

pub mod api;
pub mod app_state;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod service;
