use std::{collections::HashMap, process::Stdio, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::Semaphore,
    time::timeout,
};
use tracing::{debug, error, warn};

use crate::config::WorkerCommand;

/// Upper bound on stderr kept for diagnostics.
const MAX_DIAGNOSTIC_LEN: usize = 2048;

/// Which external worker a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Chat,
    Ingest,
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Chat => write!(f, "chat"),
            WorkerKind::Ingest => write!(f, "ingest"),
        }
    }
}

/// Classified result of one worker run. Built exactly once per invocation.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Exit code 0. `stdout` is the complete accumulated output.
    Success { stdout: Vec<u8> },
    /// Nonzero exit. `stderr` is trimmed and capped for diagnostics.
    Failure { code: Option<i32>, stderr: String },
    /// Killed at the deadline. Partial output is discarded, not returned.
    TimedOut,
    /// The process never started.
    SpawnError { message: String },
}

/// Concurrency bound and queue wait were both exhausted.
#[derive(Debug, Error)]
#[error("no worker slot became available")]
pub struct Busy;

/// Owns the kind→command mapping and the concurrency bound. Immutable after
/// construction; one instance is shared by all request tasks.
pub struct WorkerPool {
    commands: HashMap<WorkerKind, WorkerCommand>,
    /// Permits for running workers.
    slots: Semaphore,
    /// Permits for running + queued requests. Denial here means the queue is full.
    admission: Semaphore,
    timeout: Duration,
    queue_wait: Duration,
}

impl WorkerPool {
    pub fn new(
        commands: HashMap<WorkerKind, WorkerCommand>,
        max_concurrency: usize,
        queue_capacity: usize,
        run_timeout: Duration,
        queue_wait: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            commands,
            slots: Semaphore::new(max_concurrency),
            admission: Semaphore::new(max_concurrency + queue_capacity),
            timeout: run_timeout,
            queue_wait,
        })
    }

    /// Run one worker for one request: write `input` to its stdin, drain its
    /// output streams, wait for exit under the deadline, classify the result.
    /// The child is reaped on every path, including timeout and cancellation.
    pub async fn invoke(&self, kind: WorkerKind, input: &[u8]) -> Result<WorkerOutcome, Busy> {
        let Ok(_admission) = self.admission.try_acquire() else {
            warn!(%kind, "worker queue is full");
            return Err(Busy);
        };

        let _slot = match timeout(self.queue_wait, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Busy),
            Err(_) => {
                warn!(%kind, wait_secs = self.queue_wait.as_secs(), "queue wait elapsed with no free worker slot");
                return Err(Busy);
            }
        };

        let Some(command) = self.commands.get(&kind) else {
            error!(%kind, "no worker command configured");
            return Ok(WorkerOutcome::SpawnError {
                message: format!("no worker command configured for '{kind}'"),
            });
        };

        Ok(self.run(kind, command, input).await)
    }

    async fn run(&self, kind: WorkerKind, command: &WorkerCommand, input: &[u8]) -> WorkerOutcome {
        debug!(%kind, program = %command.program, bytes = input.len(), "spawning worker");

        // kill_on_drop: a cancelled request (client disconnect drops this
        // future) must still kill and reap the child.
        let mut child = match Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(%kind, program = %command.program, "failed to spawn worker: {e}");
                return WorkerOutcome::SpawnError {
                    message: e.to_string(),
                };
            }
        };

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            error!(%kind, "worker pipes unavailable after spawn");
            return WorkerOutcome::SpawnError {
                message: "worker pipes unavailable".to_string(),
            };
        };

        // Drain both streams before writing input: a worker that fills its
        // output pipe while we are still writing must not deadlock us.
        let out_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let err_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        // A worker may exit without reading its input; the exit status
        // decides the outcome, so a broken pipe here is only noise.
        if let Err(e) = stdin.write_all(input).await {
            warn!(%kind, "short write of worker input: {e}");
        }
        drop(stdin);

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                out_task.abort();
                err_task.abort();
                error!(%kind, "failed to wait on worker: {e}");
                return WorkerOutcome::SpawnError {
                    message: e.to_string(),
                };
            }
            Err(_) => {
                warn!(%kind, timeout_secs = self.timeout.as_secs(), "worker deadline exceeded, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                out_task.abort();
                err_task.abort();
                return WorkerOutcome::TimedOut;
            }
        };

        let stdout = out_task.await.unwrap_or_default();
        let stderr_bytes = err_task.await.unwrap_or_default();

        if status.success() {
            debug!(%kind, bytes = stdout.len(), "worker finished");
            WorkerOutcome::Success { stdout }
        } else {
            let stderr = truncate_diagnostic(&String::from_utf8_lossy(&stderr_bytes));
            error!(%kind, code = ?status.code(), %stderr, "worker exited nonzero");
            WorkerOutcome::Failure {
                code: status.code(),
                stderr,
            }
        }
    }
}

fn truncate_diagnostic(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= MAX_DIAGNOSTIC_LEN {
        return trimmed.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
