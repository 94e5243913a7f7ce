/// Configuration data structures for tty_relay
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::pty::PtyConfig;

/// Top level configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address for the HTTP/WebSocket server
    pub web_address: String,

    /// Stop the server once the first viewer of a session disconnects
    pub once: bool,

    /// Delay before the redraw nudge restores the original geometry, in milliseconds
    pub refresh_delay_ms: u64,

    /// Command started for every new session
    pub command: CommandConfig,

    /// Geometry used when the host terminal size is unknown
    pub terminal: TerminalConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Command configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CommandConfig {
    /// Executable to launch
    pub name: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Working directory (inherits the server's when unset)
    pub working_directory: Option<PathBuf>,

    /// Extra environment variables as `KEY=VALUE` entries
    pub environment: Vec<String>,
}

/// Terminal size configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TerminalConfig {
    /// Number of columns
    pub columns: u16,

    /// Number of rows
    pub rows: u16,

    /// Start sessions with the size of the terminal the server runs in, when there is one
    pub inherit_host_size: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,

    /// Write logs to this file instead of stdout
    pub file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".to_string(),
            once: false,
            refresh_delay_ms: 50,
            command: CommandConfig::default(),
            terminal: TerminalConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            name: "bash".to_string(),
            args: Vec::new(),
            working_directory: None,
            environment: vec!["TERM=xterm-256color".to_string()],
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            columns: 80,
            rows: 24,
            inherit_host_size: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RelayConfig {
    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }

    /// Build the spawn configuration for `command args` with this configuration's
    /// environment, working directory and default geometry.
    pub fn pty_config(&self, command: &str, args: &[String]) -> PtyConfig {
        let mut env: Vec<(String, String)> = self
            .command
            .environment
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.sort();

        PtyConfig {
            command: command.to_string(),
            args: args.to_vec(),
            cols: self.terminal.columns,
            rows: self.terminal.rows,
            env,
            cwd: self.command.working_directory.clone(),
        }
    }
}
