//! Child process supervision
//!
//! Runs one command to completion with captured output, a deadline and a
//! cancellation token. Output is drained concurrently so a chatty child never
//! blocks on a full pipe; whatever was captured before a kill is returned.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum bytes kept per stream (4 MiB)
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

/// Time allowed for pipe readers to finish after the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How the child stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

/// Captured result of one child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitKind,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitKind::Exited(Some(0))
    }
}

type Buffer = Arc<Mutex<Vec<u8>>>;

fn drain<R>(mut reader: R, buffer: Buffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let Ok(mut buf) = buffer.lock() else { break };
                    let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

fn take(buffer: &Buffer) -> String {
    match buffer.lock() {
        Ok(mut buf) => String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned(),
        Err(_) => String::new(),
    }
}

/// Run `program args...` in `dir` until it exits, times out or is cancelled
///
/// Only a failure to spawn is an error; every other outcome is reported
/// through [`ExitKind`].
pub async fn run(
    program: &str,
    args: &[&str],
    dir: &Path,
    env: &[(&str, &str)],
    limit: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<ProcessOutput> {
    let start = Instant::now();

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command.spawn()?;
    debug!(program, pid = ?child.id(), "Spawned child process");

    let stdout_buf: Buffer = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf: Buffer = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(drain(out, stdout_buf.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(drain(err, stderr_buf.clone()));
    }

    let exit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "Failed to kill cancelled child");
            }
            ExitKind::Cancelled
        }
        waited = timeout(limit, child.wait()) => match waited {
            Ok(Ok(status)) => ExitKind::Exited(status.code()),
            Ok(Err(e)) => {
                warn!(program, error = %e, "Failed to wait for child");
                ExitKind::Exited(None)
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(program, error = %e, "Failed to kill timed out child");
                }
                ExitKind::TimedOut
            }
        },
    };

    // Grandchildren may still hold the pipes open
    for mut reader in readers {
        if timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            reader.abort();
        }
    }

    Ok(ProcessOutput {
        stdout: take(&stdout_buf),
        stderr: take(&stderr_buf),
        exit,
        duration: start.elapsed(),
    })
}
