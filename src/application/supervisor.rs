use crate::domain::transcode::{TranscodeCommand, TranscodeSettings};
use crate::domain::workspace::Workspace;
use crate::error::{PipelineError, Result};
use crate::ports::process::ProcessSpawner;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SUPERVISOR_GONE: &str = "supervisor task ended";

/// Terminal state of a transcode session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Handle on a running transcode session.
///
/// Clones observe the same session. The outcome is published exactly once.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<TranscodeOutcome>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. No-op once the session has ended or was cancelled.
    pub fn cancel(&self) {
        if !self.is_terminated() {
            self.cancel.cancel();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Resolve with the outcome once the process has been reaped.
    pub async fn terminated(&self) -> TranscodeOutcome {
        let mut rx = self.outcome.clone();
        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        // sender dropped without publishing: the supervising task died
        result.unwrap_or_else(|| TranscodeOutcome::Failed(SUPERVISOR_GONE.to_string()))
    }

    pub async fn cancel_and_wait(&self) -> TranscodeOutcome {
        self.cancel();
        self.terminated().await
    }
}

/// Owns transcoder processes: launches them, forwards their logs and reports
/// how they ended. Never retries.
pub struct TranscodeSupervisor<P> {
    spawner: P,
    settings: TranscodeSettings,
    next_id: AtomicU64,
}

impl<P: ProcessSpawner> TranscodeSupervisor<P> {
    pub fn new(spawner: P, settings: TranscodeSettings) -> Self {
        Self {
            spawner,
            settings,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &TranscodeSettings {
        &self.settings
    }

    /// Launch a transcoder reading `input_url` into `workspace`. Returns as soon
    /// as the process is spawned.
    pub fn start(&self, input_url: &str, workspace: &Workspace) -> Result<SessionHandle> {
        let command = TranscodeCommand::build(input_url, workspace, &self.settings);
        let mut child = self.spawner.spawn(&command).map_err(|e| {
            PipelineError::TranscodeProcess(format!("failed to spawn {}: {}", command.program, e))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        info!(session = id, pid, input = input_url, "transcoder started");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_logs(id, stderr));
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        tokio::spawn(supervise(id, child, cancel.clone(), tx));

        Ok(SessionHandle {
            id,
            pid,
            cancel,
            outcome: rx,
        })
    }
}

async fn supervise(
    id: u64,
    mut child: Child,
    cancel: CancellationToken,
    tx: watch::Sender<Option<TranscodeOutcome>>,
) {
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => TranscodeOutcome::Succeeded,
            Ok(status) => TranscodeOutcome::Failed(format!("transcoder {}", status)),
            Err(e) => TranscodeOutcome::Failed(format!("could not wait on transcoder: {}", e)),
        },
        _ = cancel.cancelled() => {
            // kill() also reaps the child
            if let Err(e) = child.kill().await {
                warn!(session = id, error = %e, "failed to kill transcoder");
            }
            TranscodeOutcome::Cancelled
        }
    };

    match &outcome {
        TranscodeOutcome::Succeeded => info!(session = id, "transcoder finished"),
        TranscodeOutcome::Failed(reason) => error!(session = id, %reason, "transcoder failed"),
        TranscodeOutcome::Cancelled => info!(session = id, "transcoder cancelled"),
    }
    tx.send_replace(Some(outcome));
}

async fn forward_logs(id: u64, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log_line(id, &line),
            Ok(None) => break,
            Err(e) => {
                debug!(session = id, error = %e, "transcoder log stream closed");
                break;
            }
        }
    }
}

fn log_line(id: u64, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if line.to_ascii_lowercase().contains("error") {
        error!(target: "ffmpeg", session = id, "{}", line);
    } else {
        warn!(target: "ffmpeg", session = id, "{}", line);
    }
}
