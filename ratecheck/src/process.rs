//! Role process handles.
//!
//! A [`RoleProcess`] wraps one spawned external binary (entrypoint, room or
//! client). Its stdout and stderr are pumped line by line by background tasks,
//! either into a channel the scanner consumes (client) or into a bounded tail
//! buffer kept for diagnostics (services).

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ratecheck_core::error::CaseError;

/// Number of trailing output lines kept for a service role.
const TAIL_CAPACITY: usize = 200;

/// The three cooperating roles of the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Entrypoint,
    Room,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrypoint => "entrypoint",
            Self::Room => "room",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a role's output lines go.
#[derive(Clone)]
enum LineSink {
    Channel(mpsc::UnboundedSender<String>),
    Tail(Arc<Mutex<VecDeque<String>>>),
}

impl LineSink {
    fn push(&self, line: String) {
        match self {
            Self::Channel(tx) => {
                // Receiver gone means nobody is scanning any more.
                let _ = tx.send(line);
            }
            Self::Tail(tail) => {
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == TAIL_CAPACITY {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }
    }
}

/// Handle to one spawned role process.
///
/// The child is spawned with `kill_on_drop`, so dropping the handle never
/// leaks a running process.
pub struct RoleProcess {
    role: Role,
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
}

impl RoleProcess {
    /// Spawn a long-running service role. Output is kept in a tail buffer.
    pub fn spawn_service<I, S>(role: Role, program: &Path, args: I) -> Result<Self, CaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_CAPACITY)));
        let mut process = Self::spawn(
            role,
            program,
            args,
            Stdio::null(),
            LineSink::Tail(Arc::clone(&tail)),
        )?;
        process.tail = Some(tail);
        Ok(process)
    }

    /// Spawn an interactive role with a piped stdin and a streamed output channel.
    pub fn spawn_interactive<I, S>(role: Role, program: &Path, args: I) -> Result<Self, CaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut process = Self::spawn(role, program, args, Stdio::piped(), LineSink::Channel(tx))?;
        process.lines = Some(rx);
        Ok(process)
    }

    fn spawn<I, S>(
        role: Role,
        program: &Path,
        args: I,
        stdin: Stdio,
        sink: LineSink,
    ) -> Result<Self, CaseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| CaseError::Spawn {
            role: role.to_string(),
            reason: format!("{}: {}", program.display(), e),
        })?;
        let pid = child.id();
        debug!(role = %role, pid = ?pid, program = %program.display(), "role process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(role, stdout, sink.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(role, stderr, sink));
        }
        let stdin = child.stdin.take();

        Ok(Self {
            role,
            child,
            pid,
            stdin,
            lines: None,
            tail: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check. `Some(status)` once the process has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(role = %self.role, error = %e, "failed to poll role process");
                None
            }
        }
    }

    /// The process's stdin. It stays open for the life of the handle.
    pub fn stdin_mut(&mut self) -> Option<&mut ChildStdin> {
        self.stdin.as_mut()
    }

    /// Take the merged stdout/stderr line stream of an interactive role.
    pub fn take_lines(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.lines.take()
    }

    /// Snapshot of the last output lines of a service role.
    pub fn output_tail(&self) -> Vec<String> {
        self.tail
            .as_ref()
            .and_then(|tail| tail.lock().ok().map(|t| t.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process and reap it. Safe on exited processes.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(role = %self.role, error = %e, "kill on role process failed (already gone?)");
        } else {
            debug!(role = %self.role, pid = ?self.pid, "role process killed");
        }
    }

    /// Synchronous kill request for use in `Drop`. Does not reap.
    pub fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(role = %self.role, error = %e, "start_kill on role process failed");
        }
    }
}

/// Drain whatever output is still buffered (or still arriving) until the
/// stream closes or `within` elapses.
pub async fn drain_lines(
    lines: &mut mpsc::UnboundedReceiver<String>,
    within: Duration,
) -> Vec<String> {
    let mut out = Vec::new();
    let deadline = tokio::time::Instant::now() + within;
    loop {
        match tokio::time::timeout_at(deadline, lines.recv()).await {
            Ok(Some(line)) => out.push(line),
            Ok(None) | Err(_) => break,
        }
    }
    out
}

/// Forward output lines to `sink` until EOF.
///
/// Invalid UTF-8 is decoded lossily so a stray byte never stops the pump.
async fn pump_lines<R>(role: Role, reader: R, sink: LineSink)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                debug!(role = %role, line = %line, "role output");
                sink.push(line);
            }
            Err(e) => {
                warn!(role = %role, error = %e, "stopped reading role output");
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
