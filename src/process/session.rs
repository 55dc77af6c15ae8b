//! A single child MCP server process with line-framed stdio.
//!
//! [`ProcessSession::spawn`] starts the child through `bash -c` and wires
//! up four tasks: a stdout reader that frames complete lines into the
//! outbound channel, a stderr reader that surfaces diagnostics through
//! the log layer, a stdin writer that serializes inbound messages, and a
//! supervisor that owns the [`Child`] and records its exit. The returned
//! handle is cheap to clone; all clones observe the same process.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Buffered messages per direction before backpressure kicks in.
const CHANNEL_CAPACITY: usize = 256;

/// How long a closing child gets to react to SIGTERM.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Errors from spawning or writing to a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child has exited or the session was closed.
    #[error("session is closed")]
    WriteAfterClose,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Handle to a running child process session.
#[derive(Clone)]
pub struct ProcessSession {
    id: String,
    stdin_tx: mpsc::Sender<String>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    close_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    started_at: DateTime<Utc>,
}

impl ProcessSession {
    /// Spawns `command` (with `args` appended) under `bash -c` and starts
    /// the session tasks. Returns the handle plus the receiver for the
    /// child's stdout lines.
    pub fn spawn(
        id: &str,
        command: &str,
        args: &[String],
    ) -> Result<(Self, mpsc::Receiver<String>), SessionError> {
        let full_command = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&full_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "linux")]
        {
            // SAFETY: prctl(PR_SET_PDEATHSIG) is async-signal-safe. The
            // child is killed if the gateway itself dies.
            unsafe {
                cmd.pre_exec(|| {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|source| SessionError::Spawn {
            command: full_command.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) = (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) else {
            return Err(SessionError::Spawn {
                command: full_command,
                source: std::io::Error::other("failed to capture child stdio"),
            });
        };

        info!(session = %id, command = %full_command, "Spawned child process");

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stdin_tx, stdin_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(read_stdout(stdout, out_tx, id.to_string()));
        tokio::spawn(read_stderr(stderr, id.to_string()));
        tokio::spawn(write_stdin(stdin, stdin_rx, exit_rx.clone(), id.to_string()));
        tokio::spawn(supervise(child, close_rx, exit_tx, id.to_string()));

        let session = Self {
            id: id.to_string(),
            stdin_tx,
            exit_rx,
            close_tx: Arc::new(Mutex::new(Some(close_tx))),
            started_at: Utc::now(),
        };
        Ok((session, out_rx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Queues one message line for the child's stdin. Lines are written
    /// in the order they are accepted here.
    pub async fn send(&self, line: impl Into<String>) -> Result<(), SessionError> {
        if self.has_exited() {
            return Err(SessionError::WriteAfterClose);
        }
        self.stdin_tx
            .send(line.into())
            .await
            .map_err(|_| SessionError::WriteAfterClose)
    }

    /// Requests termination of the child. Idempotent; the first call
    /// wins and later calls are no-ops.
    pub fn close(&self) {
        let close_tx = match self.close_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(tx) = close_tx {
            let _ = tx.send(());
        }
    }

    /// Whether the child's exit has been observed.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Resolves once the child has exited.
    pub async fn wait_for_exit(&self) -> Option<ExitInfo> {
        let mut exit_rx = self.exit_rx.clone();
        if let Ok(info) = exit_rx.wait_for(|info| info.is_some()).await {
            return *info;
        }
        *exit_rx.borrow()
    }
}

// ============================================================================
// Session tasks
// ============================================================================

/// Frames the child's stdout into complete lines. A final line without a
/// terminating newline is discarded rather than delivered as a message.
async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    out_tx: mpsc::Sender<String>,
    session_id: String,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    debug!(
                        session = %session_id,
                        bytes = buf.len(),
                        "Discarding unterminated line at child exit"
                    );
                    break;
                }
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                if buf.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if out_tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(session = %session_id, error = %e, "Failed to read child stdout");
                break;
            }
        }
    }
}

/// Surfaces the child's stderr through the log layer, line by line.
async fn read_stderr(stderr: tokio::process::ChildStderr, session_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        warn!(session = %session_id, "child stderr: {line}");
    }
}

/// Writes queued messages to the child's stdin, newline-terminated, one
/// at a time. Stops once the child exits so later sends fail fast.
async fn write_stdin(
    mut stdin: ChildStdin,
    mut stdin_rx: mpsc::Receiver<String>,
    mut exit_rx: watch::Receiver<Option<ExitInfo>>,
    session_id: String,
) {
    loop {
        // The exit branch is wrapped so its watch guard never enters the
        // select output; the task must stay Send.
        tokio::select! {
            line = stdin_rx.recv() => {
                let Some(line) = line else { break };
                if let Err(e) = write_line(&mut stdin, &line).await {
                    error!(session = %session_id, error = %e, "Failed to write to child stdin");
                    break;
                }
            }
            _ = async { let _ = exit_rx.wait_for(|info| info.is_some()).await; } => break,
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Owns the [`Child`]: waits for its natural exit or a close request,
/// then records the exit info for every handle to observe.
async fn supervise(
    mut child: Child,
    close_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    session_id: String,
) {
    let info = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => exit_info(status),
            Err(e) => {
                error!(session = %session_id, error = %e, "Failed to wait for child");
                ExitInfo { code: None, signal: None }
            }
        },
        _ = close_rx => terminate(&mut child, &session_id).await,
    };
    info!(
        session = %session_id,
        code = ?info.code,
        signal = ?info.signal,
        "Child process exited"
    );
    let _ = exit_tx.send(Some(info));
}

/// Terminates a child on close: SIGTERM, a grace period, then SIGKILL.
async fn terminate(child: &mut Child, session_id: &str) -> ExitInfo {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: kill(2) on a pid we still own.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(Ok(status)) => return exit_info(status),
            Ok(Err(e)) => {
                error!(session = %session_id, error = %e, "Failed to wait for child");
                return ExitInfo { code: None, signal: None };
            }
            Err(_) => {
                warn!(session = %session_id, "Child did not exit after SIGTERM, killing");
            }
        }
    }

    if let Err(e) = child.kill().await {
        error!(session = %session_id, error = %e, "Failed to kill child");
    }
    match child.wait().await {
        Ok(status) => exit_info(status),
        Err(_) => ExitInfo { code: None, signal: None },
    }
}

fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
    #[cfg(not(unix))]
    let signal = None;
    ExitInfo {
        code: status.code(),
        signal,
    }
}

// ============================================================================
// Tests
// ============================================================================
