//! Request-scoped live pipeline.
//!
//! Ordering per request: fresh workspace, master playlist on disk, transcoder
//! launched, then readiness polling. The URL is published only after the
//! primary sub-playlist exists. Teardown runs the other way around.

use crate::adapters::http::ContentServer;
use crate::application::poller::ReadinessPoller;
use crate::application::supervisor::{SessionHandle, TranscodeOutcome, TranscodeSupervisor};
use crate::config::PipelineConfig;
use crate::domain::hls::write_master_playlist;
use crate::domain::session::{SessionPhase, SessionState};
use crate::domain::workspace::{WorkspaceManager, MASTER_PLAYLIST};
use crate::error::{PipelineError, Result};
use crate::ports::process::ProcessSpawner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

struct ActiveRequest {
    input_url: String,
    cancel: CancellationToken,
    session: SessionHandle,
    watcher: JoinHandle<()>,
}

pub struct LivePipeline<P> {
    server: Arc<ContentServer>,
    workspaces: WorkspaceManager,
    supervisor: TranscodeSupervisor<P>,
    poller: ReadinessPoller,
    retention: Retention,
    state: SessionState,
    /// At most one live request at a time
    active: Mutex<Option<ActiveRequest>>,
}

impl<P: ProcessSpawner> LivePipeline<P> {
    pub fn new(
        config: &PipelineConfig,
        spawner: P,
        server: Arc<ContentServer>,
        state: SessionState,
    ) -> Self {
        Self {
            server,
            workspaces: WorkspaceManager::new(&config.workspace_dir),
            supervisor: TranscodeSupervisor::new(spawner, config.transcode_settings()),
            poller: ReadinessPoller::new(config.poll_interval, config.artifact_timeout),
            retention: Retention::from_config(config),
            state,
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Launch a live request for `input_url` and return once the transcoder runs.
    ///
    /// An active request is torn down first. Readiness is reported through the
    /// session state.
    pub async fn start(&self, input_url: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(previous = %previous.input_url, "replacing active live request");
            self.stop_request(previous).await;
        }

        let generation = self.state.begin();
        info!(input = input_url, generation, "live request started");

        match self.launch(input_url, generation).await {
            Ok(request) => {
                *active = Some(request);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, kind = ?e.kind(), "live request failed before polling");
                self.state.fail(generation, e.kind());
                if let Err(cleanup) = self.workspaces.destroy().await {
                    warn!(error = %cleanup, "could not clean up workspace");
                }
                Err(e)
            }
        }
    }

    async fn launch(&self, input_url: &str, generation: u64) -> Result<ActiveRequest> {
        let mut playlist_url = self
            .server
            .base_url()
            .await
            .ok_or(PipelineError::ServerNotRunning)?;
        playlist_url.set_path(MASTER_PLAYLIST);

        let workspace = self.workspaces.prepare_fresh().await?;
        let bandwidth = self.supervisor.settings().bandwidth_hint();
        write_master_playlist(&workspace, bandwidth).await?;

        self.state.enter(generation, SessionPhase::Transcoding);
        let session = self.supervisor.start(input_url, &workspace)?;

        self.state.enter(generation, SessionPhase::Polling);
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_readiness(ReadinessWatch {
            poller: self.poller,
            retention: self.retention,
            workspaces: self.workspaces.clone(),
            artifact: workspace.video_playlist(),
            playlist_url,
            session: session.clone(),
            cancel: cancel.clone(),
            state: self.state.clone(),
            generation,
        }));

        Ok(ActiveRequest {
            input_url: input_url.to_string(),
            cancel,
            session,
            watcher,
        })
    }

    /// `start`, then wait for the stream to become ready or fail.
    pub async fn play(&self, input_url: &str) -> Result<Url> {
        self.start(input_url).await?;
        self.state.wait_settled().await.map_err(PipelineError::from)
    }

    /// Stop polling, stop the transcoder, delete the workspace and go back to
    /// `Idle`. Safe to call in any state, any number of times.
    pub async fn teardown(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(request) = active.take() {
            self.stop_request(request).await;
        }

        let destroyed = self.workspaces.destroy().await;
        self.state.reset();
        debug!("live request torn down");
        destroyed
    }

    async fn stop_request(&self, request: ActiveRequest) {
        request.cancel.cancel();
        let session = &request.session;
        let outcome = session.cancel_and_wait().await;
        debug!(session = session.id(), pid = ?session.pid(), ?outcome, "transcoder stopped");
        if let Err(e) = request.watcher.await {
            warn!(error = %e, "readiness watcher panicked");
        }
    }
}

/// Segment retention enforced while a stream is live, on top of the
/// transcoder's own `delete_segments`.
#[derive(Debug, Clone, Copy)]
struct Retention {
    /// Segments kept per rendition: the playlist window plus the one being written
    window: usize,
    interval: Duration,
}

impl Retention {
    fn from_config(config: &PipelineConfig) -> Self {
        Self {
            window: config.hls_list_size as usize + 1,
            interval: Duration::from_secs(u64::from(config.hls_time.max(1))),
        }
    }
}

struct ReadinessWatch {
    poller: ReadinessPoller,
    retention: Retention,
    workspaces: WorkspaceManager,
    artifact: PathBuf,
    playlist_url: Url,
    session: SessionHandle,
    cancel: CancellationToken,
    state: SessionState,
    generation: u64,
}

async fn watch_readiness(watch: ReadinessWatch) {
    let ReadinessWatch {
        poller,
        retention,
        workspaces,
        artifact,
        playlist_url,
        session,
        cancel,
        state,
        generation,
    } = watch;

    let result = tokio::select! {
        ready = poller.wait_for(&artifact, &cancel) => ready,
        outcome = session.terminated() => {
            // a short input may finish before the next poll tick
            let produced = tokio::fs::try_exists(&artifact).await.unwrap_or(false);
            match outcome {
                TranscodeOutcome::Cancelled => Err(PipelineError::Cancelled),
                _ if produced => Ok(()),
                other => Err(PipelineError::TranscodeProcess(format!(
                    "transcoder ended before {} appeared: {:?}",
                    artifact.display(),
                    other
                ))),
            }
        }
    };

    match result {
        Ok(()) => {
            if state.publish(generation, playlist_url.clone()) {
                info!(url = %playlist_url, "stream ready");
            }
        }
        Err(PipelineError::Cancelled) => return,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "live request failed");
            session.cancel();
            state.fail(generation, e.kind());
            return;
        }
    }

    let mut ticker = time::interval(retention.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let terminated = session.terminated();
    tokio::pin!(terminated);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = &mut terminated => {
                match outcome {
                    TranscodeOutcome::Succeeded => info!("live input ended"),
                    TranscodeOutcome::Failed(reason) => {
                        warn!(%reason, "transcoder stopped after the stream was published")
                    }
                    TranscodeOutcome::Cancelled => {}
                }
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = workspaces.prune_to(retention.window).await {
                    warn!(error = %e, "segment retention pass failed");
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::ports::process::MockProcessSpawner;
    use reqwest::StatusCode;
    use std::io;
    use std::path::Path;
    use std::process::Stdio;
    use tempfile::{tempdir, TempDir};
    use tokio::process::{Child, Command};

    const INPUT: &str = "http://203.0.113.5:5004/auto/v5.1";
    const OTHER_INPUT: &str = "http://203.0.113.5:5004/auto/v9.2";
    const UNREACHABLE: &str = "http://192.0.2.1:5004/auto/v2.1";

    struct Fixture {
        temp: TempDir,
        config: PipelineConfig,
        server: Arc<ContentServer>,
        state: SessionState,
    }

    impl Fixture {
        async fn new() -> Self {
            Self::with_config(|_| {}).await
        }

        async fn with_config(tweak: impl FnOnce(&mut PipelineConfig)) -> Self {
            let temp = tempdir().unwrap();
            let mut config = PipelineConfig {
                port: 0,
                workspace_dir: temp.path().join("hls"),
                poll_interval: Duration::from_millis(20),
                artifact_timeout: Duration::from_secs(5),
                ..PipelineConfig::default()
            };
            tweak(&mut config);

            let state = SessionState::new();
            let server = Arc::new(ContentServer::new(state.clone(), 60));
            server
                .start(&config.workspace_dir, config.bind_addr())
                .await
                .unwrap();

            Self {
                temp,
                config,
                server,
                state,
            }
        }

        fn pipeline(&self, spawner: MockProcessSpawner) -> LivePipeline<MockProcessSpawner> {
            LivePipeline::new(
                &self.config,
                spawner,
                self.server.clone(),
                self.state.clone(),
            )
        }

        fn workspace_root(&self) -> &Path {
            &self.config.workspace_dir
        }

        fn video_playlist(&self) -> PathBuf {
            self.config.workspace_dir.join("video.m3u8")
        }

        fn pid_file(&self, name: &str) -> PathBuf {
            self.temp.path().join(name)
        }
    }

    fn shell(script: &str) -> io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    fn spawner_running(script: String) -> MockProcessSpawner {
        let mut spawner = MockProcessSpawner::new();
        spawner
            .expect_spawn()
            .times(1)
            .returning(move |_| shell(&script));
        spawner
    }

    fn missing_binary() -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, "ffmpeg not found")
    }

    /// Transcoder stand-in that records its pid and never writes output.
    fn pid_script(path: &Path) -> String {
        format!("echo $$ > '{}'; exec sleep 30", path.display())
    }

    async fn read_pid(path: &Path) -> u32 {
        for _ in 0..250 {
            if let Ok(raw) = tokio::fs::read_to_string(path).await {
                if let Ok(pid) = raw.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pid file {:?} never written", path);
    }

    fn process_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn wait_until_dead(pid: u32) -> bool {
        for _ in 0..100 {
            if !process_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_url_is_published_only_after_artifact_exists() {
        let fixture = Fixture::new().await;
        let script = format!(
            "sleep 0.3; echo '#EXTM3U' > '{}'; exec sleep 30",
            fixture.video_playlist().display()
        );
        let pipeline = fixture.pipeline(spawner_running(script));

        pipeline.start(INPUT).await.unwrap();

        let snapshot = fixture.state.snapshot();
        assert!(snapshot.loading);
        assert_eq!(snapshot.resolved_url, None);
        assert_eq!(snapshot.phase, SessionPhase::Polling);
        assert!(fixture.workspace_root().join(MASTER_PLAYLIST).exists());
        assert!(!fixture.video_playlist().exists());

        let mut rx = fixture.state.subscribe();
        let published = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.resolved_url.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(fixture.video_playlist().exists());
        assert!(!published.loading);
        assert_eq!(published.phase, SessionPhase::Ready);

        let url = fixture.state.wait_settled().await.unwrap();
        assert_eq!(url.path(), "/master.m3u8");
        let res = reqwest::get(url).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.text().await.unwrap().contains("#EXT-X-STREAM-INF"));

        pipeline.teardown().await.unwrap();
        assert!(!fixture.workspace_root().exists());
        let snapshot = fixture.state.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.resolved_url, None);
        assert!(snapshot.running);
    }

    #[tokio::test]
    async fn test_teardown_before_artifact_leaves_nothing_behind() {
        let fixture = Fixture::new().await;
        let pid_file = fixture.pid_file("transcoder.pid");
        let pipeline = fixture.pipeline(spawner_running(pid_script(&pid_file)));

        pipeline.start(INPUT).await.unwrap();
        let pid = read_pid(&pid_file).await;
        assert!(process_alive(pid));

        pipeline.teardown().await.unwrap();

        assert!(!process_alive(pid));
        assert!(!fixture.workspace_root().exists());
        let snapshot = fixture.state.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.phase, SessionPhase::Idle);

        pipeline.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_input_fails_request() {
        let fixture = Fixture::new().await;
        let script = format!("echo '{}: Connection timed out' >&2; exit 1", UNREACHABLE);
        let pipeline = fixture.pipeline(spawner_running(script));

        let played = pipeline.play(UNREACHABLE);
        let err = tokio::time::timeout(Duration::from_secs(5), played)
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::TranscodeProcess);

        let snapshot = fixture.state.snapshot();
        assert!(!snapshot.loading);
        assert_eq!(snapshot.resolved_url, None);
        assert_eq!(
            snapshot.phase,
            SessionPhase::Failed(FailureKind::TranscodeProcess)
        );

        pipeline.teardown().await.unwrap();
        assert_eq!(fixture.state.snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_artifact_timeout_stops_transcoder() {
        let fixture = Fixture::with_config(|config| {
            config.artifact_timeout = Duration::from_millis(200);
        })
        .await;
        let pid_file = fixture.pid_file("stuck.pid");
        let pipeline = fixture.pipeline(spawner_running(pid_script(&pid_file)));

        let err = pipeline.play(INPUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ArtifactTimeout);
        assert_eq!(
            fixture.state.snapshot().phase,
            SessionPhase::Failed(FailureKind::ArtifactTimeout)
        );

        let pid = read_pid(&pid_file).await;
        assert!(wait_until_dead(pid).await);

        pipeline.teardown().await.unwrap();
        assert!(!fixture.workspace_root().exists());
    }

    #[tokio::test]
    async fn test_short_input_that_exits_after_writing_is_ready() {
        let fixture = Fixture::new().await;
        let script = format!(
            "echo '#EXTM3U' > '{}'; exit 0",
            fixture.video_playlist().display()
        );
        let pipeline = fixture.pipeline(spawner_running(script));

        let url = pipeline.play(INPUT).await.unwrap();
        assert_eq!(url.path(), "/master.m3u8");
        pipeline.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_live_stream_keeps_segment_window_bounded() {
        let fixture = Fixture::with_config(|config| {
            config.hls_list_size = 2;
        })
        .await;
        let root = fixture.workspace_root().display().to_string();
        let script = format!(
            "for i in 000 001 002 003 004 005; do : > \"{root}/segment_$i.ts\"; done; \
             echo '#EXTM3U' > '{root}/video.m3u8'; exec sleep 30"
        );
        let pipeline = fixture.pipeline(spawner_running(script));

        pipeline.play(INPUT).await.unwrap();

        let workspace = WorkspaceManager::new(fixture.workspace_root()).workspace();
        let mut indices = Vec::new();
        for _ in 0..150 {
            indices = workspace.segment_indices().await.unwrap();
            if indices == [3, 4, 5] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(indices, vec![3, 4, 5]);

        pipeline.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_start_replaces_first() {
        let fixture = Fixture::new().await;
        let first_pid = fixture.pid_file("first.pid");
        let first = pid_script(&first_pid);
        let second = format!(
            "echo '#EXTM3U' > '{}'; exec sleep 30",
            fixture.video_playlist().display()
        );

        let mut spawner = MockProcessSpawner::new();
        let mut calls = 0;
        spawner.expect_spawn().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                shell(&first)
            } else {
                shell(&second)
            }
        });
        let pipeline = fixture.pipeline(spawner);

        pipeline.start(INPUT).await.unwrap();
        let pid = read_pid(&first_pid).await;

        let url = pipeline.play(OTHER_INPUT).await.unwrap();
        assert!(!process_alive(pid));
        assert_eq!(url.path(), "/master.m3u8");

        pipeline.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_requires_running_server() {
        let fixture = Fixture::new().await;
        fixture.server.stop().await;

        let mut spawner = MockProcessSpawner::new();
        spawner.expect_spawn().times(0);
        let pipeline = fixture.pipeline(spawner);

        let err = pipeline.start(INPUT).await.unwrap_err();
        assert!(matches!(err, PipelineError::ServerNotRunning));
        let snapshot = fixture.state.snapshot();
        assert!(!snapshot.running);
        assert!(!snapshot.loading);
        assert_eq!(
            snapshot.phase,
            SessionPhase::Failed(FailureKind::ServerNotRunning)
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_cleans_workspace() {
        let fixture = Fixture::new().await;
        let mut spawner = MockProcessSpawner::new();
        spawner
            .expect_spawn()
            .times(1)
            .returning(|_| Err(missing_binary()));
        let pipeline = fixture.pipeline(spawner);

        let err = pipeline.start(INPUT).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::TranscodeProcess);
        assert!(!fixture.workspace_root().exists());
        assert_eq!(
            fixture.state.snapshot().phase,
            SessionPhase::Failed(FailureKind::TranscodeProcess)
        );
    }
}
