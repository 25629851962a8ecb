//! Server management - spawning the server under test and capturing its output

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};

/// Lines of each stream kept in memory
const CAPTURE_LINES: usize = 200;

/// Lines of stderr attached to a startup failure
const STDERR_TAIL_LINES: usize = 40;

/// Upper bound for flushing buffered output after the process is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How to launch the server
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub binary: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub log_file: PathBuf,
    pub grace_window: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&HarnessConfig> for LaunchOptions {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            binary: config.server.binary.clone(),
            args: config.server_args(),
            env: config.server.env.clone(),
            log_file: config.log_file(),
            grace_window: config.server.grace_window,
            shutdown_timeout: config.server.shutdown_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Stdout => f.write_str("stdout"),
            Stream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Recent output of the server, bounded per stream
#[derive(Debug)]
struct OutputCapture {
    limit: usize,
    stdout: Mutex<VecDeque<String>>,
    stderr: Mutex<VecDeque<String>>,
}

impl OutputCapture {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            stdout: Mutex::new(VecDeque::new()),
            stderr: Mutex::new(VecDeque::new()),
        }
    }

    fn buffer(&self, stream: Stream) -> &Mutex<VecDeque<String>> {
        match stream {
            Stream::Stdout => &self.stdout,
            Stream::Stderr => &self.stderr,
        }
    }

    fn push(&self, stream: Stream, line: &str) {
        let mut buf = self.buffer(stream).lock();
        if buf.len() == self.limit {
            buf.pop_front();
        }
        buf.push_back(line.to_string());
    }

    fn tail(&self, stream: Stream, n: usize) -> String {
        let buf = self.buffer(stream).lock();
        let skip = buf.len().saturating_sub(n);
        buf.iter().skip(skip).cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Handle to a running server process
///
/// The child itself is owned by a waiter task that publishes its exit status.
/// Dropping the handle without calling [`ServerHandle::stop`] kills the process.
pub struct ServerHandle {
    binary: String,
    pid: Option<u32>,
    log_path: PathBuf,
    shutdown_timeout: Duration,
    output: Arc<OutputCapture>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
    kill_tx: Option<oneshot::Sender<()>>,
    pumps: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    stopped: bool,
}

impl ServerHandle {
    /// Spawn the server, stream its output into the log file and sit out the grace window
    pub async fn launch(options: LaunchOptions) -> HarnessResult<Self> {
        if let Some(parent) = options.log_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let log = File::create(&options.log_file).await?;

        info!("Spawning {} {}", options.binary, options.args.join(" "));

        let mut child = Command::new(&options.binary)
            .args(&options.args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                binary: options.binary.clone(),
                source,
            })?;

        let pid = child.id();
        let output = Arc::new(OutputCapture::new(CAPTURE_LINES));
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(
                stdout,
                Stream::Stdout,
                line_tx.clone(),
                output.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(
                stderr,
                Stream::Stderr,
                line_tx.clone(),
                output.clone(),
            )));
        }
        drop(line_tx);
        let writer = tokio::spawn(write_log(log, line_rx));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            match status {
                Ok(status) => {
                    let _ = exit_tx.send(Some(status));
                }
                Err(e) => warn!("Failed to wait for server process: {}", e),
            }
        });

        let mut handle = ServerHandle {
            binary: options.binary,
            pid,
            log_path: options.log_file,
            shutdown_timeout: options.shutdown_timeout,
            output,
            exit_rx,
            kill_tx: Some(kill_tx),
            pumps,
            writer: Some(writer),
            stopped: false,
        };

        let early_exit = timeout(options.grace_window, handle.exited()).await;
        if let Ok(status) = early_exit {
            handle.stopped = true;
            return Err(handle.startup_failure(status).await);
        }

        info!("{} is running (pid: {})", handle.binary, pid.unwrap_or_default());
        Ok(handle)
    }

    /// Resolves once the process has exited
    pub async fn exited(&self) -> ExitStatus {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(status) = *rx.borrow_and_update() {
                return status;
            }
            if rx.changed().await.is_err() {
                // The waiter gave up without a status; nothing will ever arrive.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Describe an exit that happened before the server became usable
    pub async fn startup_failure(&mut self, status: ExitStatus) -> HarnessError {
        self.drain_output().await;
        HarnessError::Startup {
            exit_code: status.code(),
            signal: exit_signal(&status),
            stderr_tail: self.stderr_tail(STDERR_TAIL_LINES),
        }
    }

    pub fn try_exit_status(&self) -> Option<ExitStatus> {
        *self.exit_rx.borrow()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn stdout_tail(&self, lines: usize) -> String {
        self.output.tail(Stream::Stdout, lines)
    }

    pub fn stderr_tail(&self, lines: usize) -> String {
        self.output.tail(Stream::Stderr, lines)
    }

    /// Stop the server. Sends one SIGTERM and kills only if the process outlives
    /// `shutdown_timeout`. Subsequent calls do nothing.
    pub async fn stop(&mut self) -> HarnessResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if self.try_exit_status().is_none() {
            info!("Stopping server (pid: {})", self.pid.unwrap_or_default());
            self.terminate();

            match timeout(self.shutdown_timeout, self.exited()).await {
                Ok(status) => debug!("Server exited with {}", status),
                Err(_) => {
                    warn!(
                        "Server still running {:?} after SIGTERM, killing it",
                        self.shutdown_timeout
                    );
                    if let Some(kill) = self.kill_tx.take() {
                        let _ = kill.send(());
                    }
                    let _ = timeout(DRAIN_TIMEOUT, self.exited()).await;
                }
            }
        }

        self.drain_output().await;
        if let Some(writer) = self.writer.take() {
            let _ = timeout(DRAIN_TIMEOUT, writer).await;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to {}: {}", pid, e);
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
    }

    async fn drain_output(&mut self) {
        let pumps = std::mem::take(&mut self.pumps);
        let _ = timeout(DRAIN_TIMEOUT, async {
            for pump in pumps {
                let _ = pump.await;
            }
        })
        .await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("Server handle dropped without stop, killing {}", self.binary);
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

async fn pump<R: AsyncRead + Unpin>(
    reader: R,
    stream: Stream,
    tx: mpsc::UnboundedSender<String>,
    capture: Arc<OutputCapture>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                debug!(target: "server", "[{}] {}", stream, line);
                capture.push(stream, line);
                let _ = tx.send(line.to_string());
            }
            Err(e) => {
                warn!("Error reading server {}: {}", stream, e);
                break;
            }
        }
    }
}

async fn write_log(mut file: File, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        if let Err(e) = file.write_all(&bytes).await {
            warn!("Failed to append to server log: {}", e);
            continue;
        }
        if let Err(e) = file.flush().await {
            warn!("Failed to flush server log: {}", e);
        }
    }
}
