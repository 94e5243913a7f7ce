/// In-memory PTY used by tests and local experiments.
///
/// Writes are echoed back as terminal output (like a line discipline with echo on),
/// every geometry change is recorded, and the "process" exits only when told to or
/// when it is killed.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::pty::pty_trait::{ProcessExit, PtyConfig, PtyDevice, PtyError, PtyFactory, WinSize};

/// Exit code reported after a forced kill (128 + SIGKILL).
pub const KILLED_EXIT_CODE: u32 = 137;

/// Signals delivered to a [`MockPty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSignal {
    Terminate,
    Kill,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct OutputState {
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Bytes,
}

pub struct MockPty {
    output_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    output: tokio::sync::Mutex<OutputState>,
    written: Mutex<Vec<u8>>,
    size: Mutex<WinSize>,
    resizes: Mutex<Vec<WinSize>>,
    signals: Mutex<Vec<MockSignal>>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
}

impl MockPty {
    /// Create an echoing device with the given initial geometry.
    pub fn new(size: WinSize) -> Self {
        let (output_tx, rx) = mpsc::unbounded_channel();
        let (exit_tx, _) = watch::channel(None);
        Self {
            output_tx: Mutex::new(Some(output_tx)),
            output: tokio::sync::Mutex::new(OutputState {
                rx,
                pending: Bytes::new(),
            }),
            written: Mutex::new(Vec::new()),
            size: Mutex::new(size),
            resizes: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            exit_tx,
        }
    }

    /// Produce terminal output as if the process printed it.
    pub fn emit(&self, data: &[u8]) {
        if let Some(tx) = lock(&self.output_tx).as_ref() {
            let _ = tx.send(Bytes::copy_from_slice(data));
        }
    }

    /// End the process with `exit_code`; output reaches end of file.
    pub fn exit(&self, exit_code: u32) {
        info!("Mock PTY exiting with code {}", exit_code);
        lock(&self.output_tx).take();
        self.exit_tx.send_if_modified(|exit| {
            if exit.is_some() {
                return false;
            }
            *exit = Some(ProcessExit {
                exit_code,
                success: exit_code == 0,
            });
            true
        });
    }

    pub fn has_exited(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }

    /// Everything written to the terminal input so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    /// Every geometry applied through [`PtyDevice::set_win_size`], oldest first.
    pub fn resize_history(&self) -> Vec<WinSize> {
        lock(&self.resizes).clone()
    }

    pub fn signals(&self) -> Vec<MockSignal> {
        lock(&self.signals).clone()
    }
}

#[async_trait]
impl PtyDevice for MockPty {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let mut output = self.output.lock().await;
        if output.pending.is_empty() {
            match output.rx.recv().await {
                Some(chunk) => output.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(output.pending.len());
        let chunk = output.pending.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }

    async fn write(&self, data: &[u8]) -> Result<usize, PtyError> {
        if self.has_exited() {
            return Err(PtyError::ProcessTerminated);
        }
        debug!("Mock PTY input: {:?}", String::from_utf8_lossy(data));
        lock(&self.written).extend_from_slice(data);
        self.emit(data);
        Ok(data.len())
    }

    async fn set_win_size(&self, size: WinSize) -> Result<(), PtyError> {
        debug!("Mock PTY resized to {}", size);
        *lock(&self.size) = size;
        lock(&self.resizes).push(size);
        Ok(())
    }

    async fn win_size(&self) -> Result<WinSize, PtyError> {
        Ok(*lock(&self.size))
    }

    async fn wait(&self) -> Result<ProcessExit, PtyError> {
        let mut exit_rx = self.exit_tx.subscribe();
        let exit = *exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| PtyError::BackgroundTask(e.to_string()))?;
        exit.ok_or(PtyError::ProcessTerminated)
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        // Like an interactive shell, the mock ignores the polite request.
        lock(&self.signals).push(MockSignal::Terminate);
        Ok(())
    }

    async fn kill(&self) -> Result<(), PtyError> {
        lock(&self.signals).push(MockSignal::Kill);
        self.exit(KILLED_EXIT_CODE);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

// ================ 工厂实现 ================

/// Factory handing out [`MockPty`] devices and remembering each one it spawned.
#[derive(Clone, Default)]
pub struct MockPtyFactory {
    spawned: Arc<Mutex<Vec<(PtyConfig, Arc<MockPty>)>>>,
    fail_spawn: bool,
}

impl MockPtyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory whose every spawn fails, as if the executable did not exist.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn spawned(&self) -> Vec<Arc<MockPty>> {
        lock(&self.spawned).iter().map(|(_, pty)| pty.clone()).collect()
    }

    pub fn spawned_configs(&self) -> Vec<PtyConfig> {
        lock(&self.spawned).iter().map(|(config, _)| config.clone()).collect()
    }

    pub fn last(&self) -> Option<Arc<MockPty>> {
        lock(&self.spawned).last().map(|(_, pty)| pty.clone())
    }
}

#[async_trait]
impl PtyFactory for MockPtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<Arc<dyn PtyDevice>, PtyError> {
        if self.fail_spawn {
            return Err(PtyError::SpawnFailed(format!("cannot launch {}", config.command)));
        }
        let pty = Arc::new(MockPty::new(WinSize::new(config.rows, config.cols)));
        lock(&self.spawned).push((config.clone(), pty.clone()));
        Ok(pty)
    }

    fn name(&self) -> &'static str {
        "mock-pty"
    }
}
