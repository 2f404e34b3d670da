//! PTY process handles.
//!
//! A handle owns one child process running inside a pseudo-terminal. Output
//! and the final exit status are delivered on a single ordered channel so a
//! consumer always sees every output chunk before the exit event.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur during PTY operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The process has already terminated.
    #[error("process already terminated")]
    AlreadyTerminated,

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the process.
    #[error("failed to kill process: {0}")]
    KillFailed(String),
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Returns true when both dimensions are positive.
    pub fn is_valid(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }

    fn to_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Everything needed to start a process inside a PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub size: TerminalSize,
    /// Variables added to the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Events produced by a running PTY process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of raw output bytes.
    Output(Vec<u8>),
    /// The process terminated. Sent exactly once, after all output.
    Exit(i32),
}

/// A running process attached to a pseudo-terminal.
pub trait PtyProcess: Send + Sync {
    /// Process id of the child, if the platform reports one.
    fn pid(&self) -> Option<u32>;

    /// Writes bytes to the terminal input.
    fn write(&self, data: &[u8]) -> Result<(), SessionError>;

    /// Changes the terminal window size.
    fn resize(&self, size: TerminalSize) -> Result<(), SessionError>;

    /// Terminates the process. Calling it more than once is a no-op.
    fn kill(&self) -> Result<(), SessionError>;

    /// Whether the process is still running.
    fn is_running(&self) -> bool;
}

/// A freshly spawned process and its event stream.
pub struct SpawnedPty {
    pub process: Arc<dyn PtyProcess>,
    pub events: mpsc::Receiver<PtyEvent>,
}

/// Starts processes inside pseudo-terminals.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, SessionError>;
}

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Capacity of the per-process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How often the reaper polls the child for an exit status.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// How long the reaper waits for trailing output after the child is reaped.
///
/// Descendants that inherited the terminal can hold it open past the child's
/// exit; their later output is dropped.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// Event sender shared by the reader and the reaper. The reaper takes it when
/// it sends the exit event, so no output can follow the exit.
type SharedEvents = Arc<Mutex<Option<mpsc::Sender<PtyEvent>>>>;

/// Spawner backed by the operating system's PTY implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl NativePtySpawner {
    pub fn new() -> Self {
        Self
    }
}

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedPty, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(request.size.to_pty_size())
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        // The master only reports EOF once every slave handle is closed.
        drop(pair.slave);

        let pid = child.process_id();
        let child: SharedChild = Arc::new(Mutex::new(child));

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let running = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let events: SharedEvents = Arc::new(Mutex::new(Some(events_tx)));

        let reader_done = spawn_reader(reader, Arc::clone(&events), pid)?;
        spawn_reaper(
            Arc::clone(&child),
            events,
            reader_done,
            Arc::clone(&running),
            pid,
        );

        tracing::debug!(
            program = %request.program,
            pid = ?pid,
            cols = request.size.cols,
            rows = request.size.rows,
            "Spawned PTY process"
        );

        let process = NativePty {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child,
            running,
            killed: AtomicBool::new(false),
            pid,
        };

        Ok(SpawnedPty {
            process: Arc::new(process),
            events: events_rx,
        })
    }
}

/// Reads the PTY until EOF, forwarding each chunk as an output event.
///
/// Runs on a dedicated thread: a descendant holding the terminal open can
/// keep the read blocked, and that must not hold up runtime shutdown.
/// The returned receiver disconnects when the reader finishes.
fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    events: SharedEvents,
    pid: Option<u32>,
) -> Result<std_mpsc::Receiver<()>, SessionError> {
    let (done_tx, done_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let _done = done_tx;
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let Ok(guard) = events.lock() else { break };
                        match guard.as_ref() {
                            // Keep draining after the receiver is gone so the child never blocks on output.
                            Some(tx) => {
                                if tx.blocking_send(PtyEvent::Output(buffer[..n].to_vec())).is_err() {
                                    tracing::trace!(pid = ?pid, "No receiver for PTY output");
                                }
                            }
                            None => tracing::trace!(pid = ?pid, "Dropping output after exit"),
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Linux reports EIO on the master once the child side closes.
                        tracing::trace!(pid = ?pid, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
        })
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    Ok(done_rx)
}

/// Waits for the child to exit, then reports its exit code after the output.
fn spawn_reaper(
    child: SharedChild,
    events: SharedEvents,
    reader_done: std_mpsc::Receiver<()>,
    running: Arc<AtomicBool>,
    pid: Option<u32>,
) {
    tokio::task::spawn_blocking(move || {
        let code = loop {
            let status = match child.lock() {
                Ok(mut child) => child.try_wait(),
                Err(_) => break -1,
            };
            match status {
                Ok(Some(status)) => break status.exit_code() as i32,
                Ok(None) => std::thread::sleep(REAP_INTERVAL),
                Err(e) => {
                    tracing::warn!(pid = ?pid, error = %e, "Failed to reap PTY child");
                    break -1;
                }
            }
        };
        running.store(false, Ordering::SeqCst);

        if let Err(std_mpsc::RecvTimeoutError::Timeout) =
            reader_done.recv_timeout(OUTPUT_DRAIN_TIMEOUT)
        {
            tracing::debug!(pid = ?pid, "Terminal still held open after child exit");
        }

        tracing::debug!(pid = ?pid, code, "PTY process exited");
        let sender = events.lock().ok().and_then(|mut events| events.take());
        if let Some(tx) = sender {
            let _ = tx.blocking_send(PtyEvent::Exit(code));
        }
    });
}

/// A process running in a native pseudo-terminal.
struct NativePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: SharedChild,
    running: Arc<AtomicBool>,
    killed: AtomicBool,
    pid: Option<u32>,
}

impl PtyProcess for NativePty {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::AlreadyTerminated);
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SessionError::WriteFailed("writer lock poisoned".to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| SessionError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SessionError::WriteFailed(e.to_string()))
    }

    fn resize(&self, size: TerminalSize) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::AlreadyTerminated);
        }

        let master = self
            .master
            .lock()
            .map_err(|_| SessionError::ResizeFailed("master lock poisoned".to_string()))?;
        master
            .resize(size.to_pty_size())
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))?;

        tracing::debug!(pid = ?self.pid, cols = size.cols, rows = size.rows, "Resized PTY");
        Ok(())
    }

    /// Sends SIGHUP, and SIGKILL if the child is still alive after a short grace.
    fn kill(&self) -> Result<(), SessionError> {
        if self.killed.swap(true, Ordering::SeqCst) || !self.is_running() {
            return Ok(());
        }

        let mut child = self
            .child
            .lock()
            .map_err(|_| SessionError::KillFailed("child lock poisoned".to_string()))?;
        match child.kill() {
            Ok(()) => {
                tracing::debug!(pid = ?self.pid, "Killed PTY process");
                Ok(())
            }
            // Lost the race against a natural exit.
            Err(_) if matches!(child.try_wait(), Ok(Some(_))) => Ok(()),
            Err(e) => Err(SessionError::KillFailed(e.to_string())),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
