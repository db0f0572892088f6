//! Transfer trigger and client output scanning.
//!
//! The client role is given a fixed settle delay, checked for liveness, and
//! then sent a single `<command> <filename>` line. Its merged output is
//! scanned for the sentinel; the first hit marks the transfer start, the
//! client's exit marks the end.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use ratecheck_core::error::CaseError;
use ratecheck_core::types::TransferWindow;

use crate::process::{RoleProcess, drain_lines};

/// Lines of client output retained for failure diagnostics.
const TRANSCRIPT_CAPACITY: usize = 500;

/// How long to wait for trailing output once the client is known to be gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Send the download command to a freshly started client.
///
/// Fails with [`CaseError::EarlyExit`] if the client is already gone after
/// `settle`, or [`CaseError::BrokenPipe`] if its stdin cannot be written.
pub async fn trigger(
    client: &mut RoleProcess,
    lines: &mut mpsc::UnboundedReceiver<String>,
    command_line: &str,
    settle: Duration,
) -> Result<(), CaseError> {
    tokio::time::sleep(settle).await;

    if let Some(status) = client.exit_status() {
        return Err(CaseError::EarlyExit {
            status: status.to_string(),
            output: drain_lines(lines, DRAIN_GRACE).await,
        });
    }

    info!(command = %command_line.trim_end(), "requesting file");
    let written = match client.stdin_mut() {
        Some(stdin) => write_line(stdin, command_line).await,
        None => Err(std::io::ErrorKind::BrokenPipe.into()),
    };
    if let Err(e) = written {
        debug!(error = %e, "writing command to client failed");
        return Err(CaseError::BrokenPipe {
            output: drain_lines(lines, DRAIN_GRACE).await,
        });
    }
    Ok(())
}

async fn write_line<W>(stdin: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Tracks sentinel detection and the client transcript.
#[derive(Debug)]
pub struct SentinelScanner {
    sentinel: String,
    start: Option<Instant>,
    hits: usize,
    transcript: VecDeque<String>,
}

impl SentinelScanner {
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
            start: None,
            hits: 0,
            transcript: VecDeque::new(),
        }
    }

    /// Feed one output line observed at `now`. Only the first sentinel
    /// occurrence sets the start timestamp.
    pub fn observe(&mut self, line: String, now: Instant) {
        if line.contains(&self.sentinel) {
            self.hits += 1;
            if self.start.is_none() {
                info!("sentinel detected, transfer started");
                self.start = Some(now);
            }
        }
        if self.transcript.len() == TRANSCRIPT_CAPACITY {
            self.transcript.pop_front();
        }
        self.transcript.push_back(line);
    }

    pub fn start(&self) -> Option<Instant> {
        self.start
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn transcript(&self) -> Vec<String> {
        self.transcript.iter().cloned().collect()
    }

    /// Read until the output stream closes and the client has exited.
    ///
    /// Unbounded on its own; callers wrap it in a timeout. Cancel-safe in the
    /// sense that everything observed so far stays in `self`.
    pub async fn run(
        &mut self,
        client: &mut RoleProcess,
        lines: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<TransferWindow, CaseError> {
        while let Some(line) = lines.recv().await {
            self.observe(line, Instant::now());
        }
        let status = client.wait().await;
        let end = Instant::now();
        debug!(status = ?status.as_ref().map(|s| s.to_string()), hits = self.hits, "client terminated");

        match self.start {
            Some(start) => Ok(TransferWindow { start, end }),
            None => Err(CaseError::TriggerNotDetected {
                output: self.transcript(),
            }),
        }
    }
}
