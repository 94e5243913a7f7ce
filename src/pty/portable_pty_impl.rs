use crate::pty::pty_trait::{ProcessExit, PtyConfig, PtyDevice, PtyError, PtyFactory, WinSize};
use async_trait::async_trait;
use bytes::Bytes;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
#[cfg(not(unix))]
use portable_pty::ChildKiller;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, mpsc};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, trace};

/// Size of a single blocking read from the PTY master.
const READ_CHUNK_SIZE: usize = 4096;

/// Output chunks buffered between the blocking reader and async consumers.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// 基于 portable-pty 库的异步 PTY 实现
///
/// Blocking reads happen on a dedicated blocking task that forwards chunks through a
/// bounded channel; writes, waits and resizes are short blocking calls guarded by
/// their own locks so they never contend with each other.
pub struct PortablePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    #[cfg(not(unix))]
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    pid: Option<u32>,
    output: tokio::sync::Mutex<OutputState>,
    exit: OnceCell<ProcessExit>,
}

struct OutputState {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl PortablePty {
    pub fn new(config: &PtyConfig) -> Result<Self, PtyError> {
        info!(
            "PortablePty: Creating PTY with command: {:?}, args: {:?}",
            config.command, config.args
        );

        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("cannot allocate pty: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::SpawnFailed(format!("cannot launch {}: {}", config.command, e)))?;
        // The slave end must not outlive the spawn, otherwise the master never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        #[cfg(not(unix))]
        let killer = child.clone_killer();

        let writer = pair.master.take_writer()?;
        let reader = pair.master.try_clone_reader()?;

        let (data_tx, data_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        spawn_blocking(move || pump_reader(reader, data_tx));

        info!("PortablePty: Spawned {} (pid {:?})", config.command, pid);

        Ok(Self {
            master: Mutex::new(pair.master),
            writer: Arc::new(Mutex::new(writer)),
            child: Arc::new(Mutex::new(child)),
            #[cfg(not(unix))]
            killer: Mutex::new(killer),
            pid,
            output: tokio::sync::Mutex::new(OutputState {
                rx: data_rx,
                pending: Bytes::new(),
            }),
            exit: OnceCell::new(),
        })
    }

    #[cfg(unix)]
    fn send_signal(&self, signal: nix::sys::signal::Signal) -> Result<(), PtyError> {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        // Never signal a pid that may already have been reused.
        if self.exit.initialized() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Err(PtyError::ProcessTerminated);
        };
        match nix::sys::signal::kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(PtyError::Signal(format!("{:?} to pid {}: {}", signal, pid, e))),
        }
    }

    #[cfg(not(unix))]
    fn kill_child(&self) -> Result<(), PtyError> {
        if self.exit.initialized() {
            return Ok(());
        }
        let mut killer = self
            .killer
            .lock()
            .map_err(|e| PtyError::Other(format!("killer lock poisoned: {}", e)))?;
        killer.kill().map_err(PtyError::Io)
    }
}

/// Blocking loop draining the PTY master into the output channel.
fn pump_reader(mut reader: Box<dyn Read + Send>, data_tx: mpsc::Sender<Bytes>) {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!("PTY EOF reached, stopping background reader");
                break;
            }
            Ok(n) => {
                trace!("PTY background reader: read {} bytes", n);
                if data_tx.blocking_send(Bytes::copy_from_slice(&buffer[..n])).is_err() {
                    debug!("PTY background reader: receiver dropped, stopping");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux reports EIO once the child side is gone.
                debug!("PTY background reader stopped: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl PtyDevice for PortablePty {
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
        let writer = self.writer.clone();
        let data = data.to_vec();
        let len = data.len();
        spawn_blocking(move || -> std::io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|e| std::io::Error::other(format!("writer lock poisoned: {}", e)))?;
            writer.write_all(&data)?;
            writer.flush()
        })
        .await??;
        trace!("PortablePty: wrote {} bytes", len);
        Ok(len)
    }

    async fn set_win_size(&self, size: WinSize) -> Result<(), PtyError> {
        debug!("PortablePty: Resizing PTY to {}", size);
        let master = self
            .master
            .lock()
            .map_err(|e| PtyError::ResizeFailed(format!("master lock poisoned: {}", e)))?;
        master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    async fn win_size(&self) -> Result<WinSize, PtyError> {
        let master = self
            .master
            .lock()
            .map_err(|e| PtyError::Other(format!("master lock poisoned: {}", e)))?;
        let size = master.get_size()?;
        Ok(WinSize::new(size.rows, size.cols))
    }

    async fn wait(&self) -> Result<ProcessExit, PtyError> {
        let exit = self
            .exit
            .get_or_try_init(|| async {
                let child = self.child.clone();
                let status = spawn_blocking(move || -> std::io::Result<portable_pty::ExitStatus> {
                    let mut child = child
                        .lock()
                        .map_err(|e| std::io::Error::other(format!("child lock poisoned: {}", e)))?;
                    child.wait()
                })
                .await??;
                Ok::<_, PtyError>(ProcessExit {
                    exit_code: status.exit_code(),
                    success: status.success(),
                })
            })
            .await
            .inspect_err(|e| error!("PortablePty: wait failed: {}", e))?;
        Ok(*exit)
    }

    async fn terminate(&self) -> Result<(), PtyError> {
        #[cfg(unix)]
        return self.send_signal(nix::sys::signal::Signal::SIGTERM);

        // No polite signal outside Unix.
        #[cfg(not(unix))]
        return self.kill_child();
    }

    async fn kill(&self) -> Result<(), PtyError> {
        #[cfg(unix)]
        return self.send_signal(nix::sys::signal::Signal::SIGKILL);

        #[cfg(not(unix))]
        return self.kill_child();
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

// ================ 工厂实现 ================

/// 基于 portable-pty 的 PTY 工厂
#[derive(Debug, Default)]
pub struct PortablePtyFactory;

#[async_trait]
impl PtyFactory for PortablePtyFactory {
    async fn create(&self, config: &PtyConfig) -> Result<Arc<dyn PtyDevice>, PtyError> {
        // openpty 和 spawn 都是阻塞操作
        let config = config.clone();
        let pty = spawn_blocking(move || PortablePty::new(&config)).await??;
        Ok(Arc::new(pty))
    }

    fn name(&self) -> &'static str {
        "portable-pty"
    }
}
