use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

// ================ 配置与错误类型 ================

#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
    pub cwd: Option<std::path::PathBuf>,
}

/// Terminal geometry as reported to the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinSize {
    pub rows: u16,
    pub cols: u16,
}

impl WinSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for WinSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub exit_code: u32,
    pub success: bool,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "exited successfully")
        } else {
            write!(f, "exited with code {}", self.exit_code)
        }
    }
}

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Process already terminated")]
    ProcessTerminated,
    #[error("Resize failed: {0}")]
    ResizeFailed(String),
    #[error("Signal delivery failed: {0}")]
    Signal(String),
    #[error("Background task error: {0}")]
    BackgroundTask(String),
    #[error("Other error: {0}")]
    Other(String),
}

impl From<anyhow::Error> for PtyError {
    fn from(error: anyhow::Error) -> Self {
        PtyError::Other(error.to_string())
    }
}

impl From<tokio::task::JoinError> for PtyError {
    fn from(error: tokio::task::JoinError) -> Self {
        PtyError::BackgroundTask(error.to_string())
    }
}

// ================ 核心Trait定义 ================

/// A spawned command bound to the controlling side of a pseudo-terminal.
///
/// All methods take `&self` so the device can be shared between the output pump,
/// every attached viewer and the exit watcher at the same time.
#[async_trait]
pub trait PtyDevice: Send + Sync {
    /// Read raw terminal output. `Ok(0)` means the device reached end of file.
    async fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError>;

    /// Write raw bytes to the terminal input. Returns the number of bytes written.
    async fn write(&self, data: &[u8]) -> Result<usize, PtyError>;

    /// Apply a new geometry.
    async fn set_win_size(&self, size: WinSize) -> Result<(), PtyError>;

    /// Geometry currently applied to the device.
    async fn win_size(&self) -> Result<WinSize, PtyError>;

    /// Wait for the process to exit. Every caller observes the same result.
    async fn wait(&self) -> Result<ProcessExit, PtyError>;

    /// Ask the process to terminate (SIGTERM on Unix).
    async fn terminate(&self) -> Result<(), PtyError>;

    /// Force the process to stop (SIGKILL on Unix).
    async fn kill(&self) -> Result<(), PtyError>;

    /// 获取进程ID（如果可用）
    fn pid(&self) -> Option<u32>;
}

/// PTY工厂Trait
#[async_trait]
pub trait PtyFactory: Send + Sync {
    /// Spawn `config.command` on a freshly allocated pseudo-terminal.
    async fn create(&self, config: &PtyConfig) -> Result<Arc<dyn PtyDevice>, PtyError>;

    /// 工厂名称
    fn name(&self) -> &'static str;
}
