use crate::error::{PipelineError, Result};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Watches for a file the transcoder is expected to produce.
///
/// Checks once per `interval`, gives up after `max_wait`.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    interval: Duration,
    max_wait: Duration,
}

impl ReadinessPoller {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            max_wait,
        }
    }

    /// Resolve once `path` exists.
    ///
    /// Errors with `Cancelled` when `cancel` fires first and with
    /// `ArtifactTimeout` when `max_wait` elapses first. A file that is already
    /// there resolves even with a zero `max_wait`.
    pub async fn wait_for(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "artifact already present");
            return Ok(());
        }

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = time::sleep(self.max_wait);
        tokio::pin!(deadline);

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(path = %path.display(), ticks, "readiness polling cancelled");
                    return Err(PipelineError::Cancelled);
                }
                _ = &mut deadline => {
                    return Err(PipelineError::ArtifactTimeout {
                        path: path.to_path_buf(),
                        waited: self.max_wait,
                    });
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    if fs::try_exists(path).await.unwrap_or(false) {
                        debug!(path = %path.display(), ticks, "artifact present");
                        return Ok(());
                    }
                    trace!(path = %path.display(), ticks, "artifact not there yet");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;

    fn poller() -> ReadinessPoller {
        ReadinessPoller::new(Duration::from_millis(10), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_existing_file_resolves_immediately() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");
        fs::write(&path, b"#EXTM3U\n").await.unwrap();

        let started = Instant::now();
        poller()
            .wait_for(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_existing_file_wins_over_zero_max_wait() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");
        fs::write(&path, b"#EXTM3U\n").await.unwrap();

        let poller = ReadinessPoller::new(Duration::from_millis(10), Duration::ZERO);
        poller
            .wait_for(&path, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_max_wait_times_out_on_missing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");

        let poller = ReadinessPoller::new(Duration::from_millis(10), Duration::ZERO);
        let err = poller
            .wait_for(&path, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactTimeout { .. }));
    }

    #[tokio::test]
    async fn test_resolves_only_after_file_appears() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");

        let writer_path = path.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(150)).await;
            fs::write(&writer_path, b"#EXTM3U\n").await.unwrap();
        });

        let started = Instant::now();
        poller()
            .wait_for(&path, &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_times_out_when_file_never_appears() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");
        let poller = ReadinessPoller::new(Duration::from_millis(10), Duration::from_millis(100));

        let err = poller
            .wait_for(&path, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::ArtifactTimeout { path: p, waited } => {
                assert_eq!(p, path);
                assert_eq!(waited, Duration::from_millis(100));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_polling_without_resolving() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("video.m3u8");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = poller().wait_for(&path, &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
