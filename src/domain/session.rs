//! Observable state of the live request, shared by the pipeline components
//! and read by the player.

use crate::error::FailureKind;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

/// Request lifecycle: `Idle -> Preparing -> Transcoding -> Polling -> Ready`,
/// with `Failed` reachable from the three middle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Preparing,
    Transcoding,
    Polling,
    Ready,
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Content server has bound its port
    pub running: bool,
    /// A request is in flight and has neither published nor failed
    pub loading: bool,
    /// Master playlist URL, only present once the primary artifact exists
    pub resolved_url: Option<Url>,
    pub phase: SessionPhase,
    /// Bumped on every request start and reset; stale updates are dropped
    pub generation: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            running: false,
            loading: false,
            resolved_url: None,
            phase: SessionPhase::Idle,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_running(&self, running: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.running != running;
            s.running = running;
            changed
        });
    }

    /// Start a new request: clears any previously resolved URL.
    /// Returns the generation later updates must carry.
    pub fn begin(&self) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|s| {
            s.generation += 1;
            s.loading = true;
            s.resolved_url = None;
            s.phase = SessionPhase::Preparing;
            generation = s.generation;
        });
        generation
    }

    pub fn enter(&self, generation: u64, phase: SessionPhase) -> bool {
        self.tx.send_if_modified(|s| {
            if s.generation != generation || !s.loading {
                return false;
            }
            s.phase = phase;
            true
        })
    }

    pub fn publish(&self, generation: u64, url: Url) -> bool {
        self.tx.send_if_modified(|s| {
            if s.generation != generation || !s.loading {
                return false;
            }
            s.resolved_url = Some(url);
            s.loading = false;
            s.phase = SessionPhase::Ready;
            true
        })
    }

    pub fn fail(&self, generation: u64, kind: FailureKind) -> bool {
        self.tx.send_if_modified(|s| {
            if s.generation != generation || !s.loading {
                return false;
            }
            s.resolved_url = None;
            s.loading = false;
            s.phase = SessionPhase::Failed(kind);
            true
        })
    }

    /// Back to `Idle`. `running` is owned by the content server and left alone.
    pub fn reset(&self) {
        self.tx.send_modify(|s| {
            s.generation += 1;
            s.loading = false;
            s.resolved_url = None;
            s.phase = SessionPhase::Idle;
        });
    }

    /// Wait until the current request is `Ready` or `Failed`.
    ///
    /// A reset while waiting is reported as `Cancelled`.
    pub async fn wait_settled(&self) -> Result<Url, FailureKind> {
        let mut rx = self.subscribe();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                match (&snapshot.phase, &snapshot.resolved_url) {
                    (SessionPhase::Ready, Some(url)) => return Ok(url.clone()),
                    (SessionPhase::Failed(kind), _) => return Err(*kind),
                    (SessionPhase::Idle, _) => return Err(FailureKind::Cancelled),
                    _ => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(FailureKind::Cancelled);
            }
        }
    }
}
