/// Application state management for tty_relay
mod app_state;

pub use app_state::AppState;
