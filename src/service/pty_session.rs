/// PTY backed terminal session shared by every attached viewer
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast::error::SendError;
use tokio::sync::{Notify, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};

use crate::protocol::{ProtocolConnection, TtyMessage};
use crate::pty::{ProcessExit, PtyConfig, PtyDevice, PtyFactory, WinSize, host_win_size};
use crate::service::SessionError;

/// Output chunks a slow viewer may fall behind before it is dropped.
const OUTPUT_BROADCAST_CAPACITY: usize = 1024;

/// Size of a single read from the device by the output pump.
const PUMP_BUFFER_SIZE: usize = 4096;

/// How long teardown waits to tell a viewer the session is over.
const TERMINATE_NOTICE_TIMEOUT: Duration = Duration::from_millis(200);

/// Per-session knobs that do not belong to the spawned command itself.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Delay between shrinking and restoring the geometry in [`PtySession::refresh`]
    pub refresh_delay: Duration,
    /// Prefer the host terminal size over the configured one for the initial geometry
    pub inherit_host_size: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_millis(50),
            inherit_host_size: true,
        }
    }
}

/// One running command on one pseudo-terminal, addressable by id.
///
/// A single pump task reads the device and publishes every chunk to a broadcast
/// channel; each attached connection owns a subscription, so all viewers see the
/// same byte sequence. While nobody is attached the pump stops reading, and the
/// output stays buffered in the device until the next viewer arrives.
pub struct PtySession {
    id: String,
    device: Arc<dyn PtyDevice>,
    connections: RwLock<Vec<Arc<ProtocolConnection>>>,
    torn_down: AtomicBool,
    output_tx: broadcast::Sender<Bytes>,
    viewer_joined: Arc<Notify>,
    pump_stop: CancellationToken,
    refresh_delay: Duration,
    span: Span,
}

impl PtySession {
    /// Spawn the configured command on a new pseudo-terminal and start pumping its output.
    pub async fn start(
        id: &str,
        factory: &dyn PtyFactory,
        config: &PtyConfig,
        options: SessionOptions,
        parent: &Span,
    ) -> Result<Arc<Self>, SessionError> {
        let span = info_span!(parent: parent, "session", id = %id);

        let device = factory
            .create(config)
            .await
            .map_err(|source| SessionError::Spawn {
                id: id.to_string(),
                source,
            })?;

        let initial = options
            .inherit_host_size
            .then(host_win_size)
            .flatten()
            .unwrap_or(WinSize::new(config.rows, config.cols));
        if let Err(e) = device.set_win_size(initial).await {
            warn!(parent: &span, "Cannot apply initial window size {}: {}", initial, e);
        }

        let (output_tx, _) = broadcast::channel(OUTPUT_BROADCAST_CAPACITY);
        let viewer_joined = Arc::new(Notify::new());
        let pump_stop = CancellationToken::new();
        let pump = pump_output(
            device.clone(),
            output_tx.clone(),
            viewer_joined.clone(),
            pump_stop.clone(),
        );
        tokio::spawn(pump.instrument(span.clone()));

        info!(
            parent: &span,
            "Started {} {:?} with {} ({})",
            config.command,
            config.args,
            factory.name(),
            initial
        );

        Ok(Arc::new(Self {
            id: id.to_string(),
            device,
            connections: RwLock::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            output_tx,
            viewer_joined,
            pump_stop,
            refresh_delay: options.refresh_delay,
            span,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Read raw output straight from the device.
    ///
    /// This competes with the output pump while viewers are attached; bytes read
    /// here are not broadcast.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, SessionError> {
        Ok(self.device.read(buf).await?)
    }

    /// Write raw bytes to the terminal input.
    pub async fn write(&self, data: &[u8]) -> Result<usize, SessionError> {
        Ok(self.device.write(data).await?)
    }

    /// Apply a new geometry. Failures are logged, not returned.
    pub async fn set_win_size(&self, rows: u16, cols: u16) {
        let size = WinSize::new(rows, cols);
        if let Err(e) = self.device.set_win_size(size).await {
            warn!(parent: &self.span, "Cannot resize to {}: {}", size, e);
        }
    }

    pub async fn win_size(&self) -> Result<WinSize, SessionError> {
        Ok(self.device.win_size().await?)
    }

    /// Make the running program repaint by shrinking the terminal by one row and
    /// restoring it after a short delay (programs redraw on SIGWINCH).
    ///
    /// Returns the task performing the restore, or None when the current size is
    /// unknown and nothing was changed.
    pub async fn refresh(&self) -> Option<JoinHandle<()>> {
        let size = match self.device.win_size().await {
            Ok(size) => size,
            Err(e) => {
                debug!(parent: &self.span, "Skipping refresh, size unknown: {}", e);
                return None;
            }
        };

        self.set_win_size(size.rows.saturating_sub(1), size.cols).await;

        let device = self.device.clone();
        let delay = self.refresh_delay;
        let restore = async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = device.set_win_size(size).await {
                debug!("Cannot restore size {} after refresh: {}", size, e);
            }
        };
        Some(tokio::spawn(restore.instrument(self.span.clone())))
    }

    /// Wait for the command to exit.
    pub async fn wait(&self) -> Result<ProcessExit, SessionError> {
        Ok(self.device.wait().await?)
    }

    /// Terminate the command and close every attached connection.
    ///
    /// The polite signal is followed right away by the forced one; there is no grace
    /// period in between.
    pub async fn stop(&self) {
        info!(parent: &self.span, "Stopping session");
        if let Err(e) = self.device.terminate().await {
            warn!(parent: &self.span, "Terminate signal failed: {}", e);
        }
        if let Err(e) = self.device.kill().await {
            warn!(parent: &self.span, "Kill signal failed: {}", e);
        }
        self.close_connections().await;
    }

    /// Tell every attached viewer the session is over and close it.
    ///
    /// The connection list stays write-locked for the whole loop, and once this has
    /// run no new connection can attach.
    pub async fn close_connections(&self) {
        let mut connections = self.connections.write().await;
        self.torn_down.store(true, Ordering::SeqCst);
        self.pump_stop.cancel();
        for conn in connections.drain(..) {
            let notice = conn.send_message(&TtyMessage::Terminate);
            if tokio::time::timeout(TERMINATE_NOTICE_TIMEOUT, notice).await.is_err() {
                debug!(parent: &self.span, "Viewer {} did not take the terminate notice", conn.address());
            }
            if let Err(e) = conn.close().await {
                debug!(parent: &self.span, "Closing viewer {} failed: {}", conn.address(), e);
            }
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub async fn attached_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Add `conn` to the broadcast set. Returns its output subscription, or None when
    /// the session has already been torn down.
    pub(crate) async fn attach(
        &self,
        conn: Arc<ProtocolConnection>,
    ) -> Option<broadcast::Receiver<Bytes>> {
        let mut connections = self.connections.write().await;
        if self.is_torn_down() {
            return None;
        }
        // Subscribe while holding the lock so membership and delivery change together.
        let output = self.output_tx.subscribe();
        connections.push(conn);
        self.viewer_joined.notify_one();
        Some(output)
    }

    /// Remove `conn` from the broadcast set.
    pub(crate) async fn detach(&self, conn: &Arc<ProtocolConnection>) {
        let mut connections = self.connections.write().await;
        connections.retain(|c| !Arc::ptr_eq(c, conn));
    }
}

/// Read the device until end of file and publish every chunk.
///
/// Reading waits while no viewer is subscribed, and a chunk that found no
/// subscriber is kept for the next one, so output printed before the first attach
/// is not lost.
async fn pump_output(
    device: Arc<dyn PtyDevice>,
    output_tx: broadcast::Sender<Bytes>,
    viewer_joined: Arc<Notify>,
    stop: CancellationToken,
) {
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut held: Option<Bytes> = None;
    loop {
        while output_tx.receiver_count() == 0 {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = viewer_joined.notified() => {}
            }
        }

        if let Some(chunk) = held.take() {
            if let Err(SendError(chunk)) = output_tx.send(chunk) {
                held = Some(chunk);
                continue;
            }
        }

        let read = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            read = device.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                debug!("PTY output reached end of file");
                break;
            }
            Ok(n) => {
                trace!("Broadcasting {} bytes of output", n);
                if let Err(SendError(chunk)) = output_tx.send(Bytes::copy_from_slice(&buf[..n])) {
                    // Every viewer left mid-read.
                    held = Some(chunk);
                }
            }
            Err(e) => {
                debug!("PTY output stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryTransport;
    use crate::pty::{MockPtyFactory, MockSignal};

    fn pty_config() -> PtyConfig {
        PtyConfig {
            command: "cat".to_string(),
            args: vec![],
            cols: 80,
            rows: 24,
            env: vec![],
            cwd: None,
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            refresh_delay: Duration::from_millis(10),
            inherit_host_size: false,
        }
    }

    #[tokio::test]
    async fn start_applies_configured_size() {
        let factory = MockPtyFactory::new();
        let session = PtySession::start("1", &factory, &pty_config(), options(), &Span::none())
            .await
            .unwrap();
        assert_eq!(session.win_size().await.unwrap(), WinSize::new(24, 80));
        assert_eq!(factory.last().unwrap().resize_history(), vec![WinSize::new(24, 80)]);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let result =
            PtySession::start("1", &MockPtyFactory::failing(), &pty_config(), options(), &Span::none()).await;
        assert!(matches!(result, Err(SessionError::Spawn { id, .. }) if id == "1"));
    }

    #[tokio::test]
    async fn refresh_shrinks_then_restores() {
        let factory = MockPtyFactory::new();
        let session = PtySession::start("1", &factory, &pty_config(), options(), &Span::none())
            .await
            .unwrap();
        session.set_win_size(30, 100).await;

        let restore = session.refresh().await.unwrap();
        let pty = factory.last().unwrap();
        assert_eq!(pty.win_size().await.unwrap(), WinSize::new(29, 100));

        restore.await.unwrap();
        let history = pty.resize_history();
        assert_eq!(
            &history[history.len() - 2..],
            &[WinSize::new(29, 100), WinSize::new(30, 100)]
        );
    }

    #[tokio::test]
    async fn stop_without_viewers() {
        let factory = MockPtyFactory::new();
        let session = PtySession::start("1", &factory, &pty_config(), options(), &Span::none())
            .await
            .unwrap();
        assert_eq!(session.attached_count().await, 0);

        session.stop().await;

        let pty = factory.last().unwrap();
        assert_eq!(pty.signals(), vec![MockSignal::Terminate, MockSignal::Kill]);
        assert!(session.wait().await.is_ok());
        assert!(session.is_torn_down());
    }

    #[tokio::test]
    async fn attach_after_teardown_is_refused() {
        let factory = MockPtyFactory::new();
        let session = PtySession::start("1", &factory, &pty_config(), options(), &Span::none())
            .await
            .unwrap();
        session.close_connections().await;

        let (transport, _peer) = MemoryTransport::pair("late");
        let conn = Arc::new(ProtocolConnection::new(Box::new(transport)));
        assert!(session.attach(conn).await.is_none());
        assert_eq!(session.attached_count().await, 0);
    }
}
