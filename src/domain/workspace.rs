//! On-disk workspace for generated HLS artifacts.
//!
//! Layout (everything directly under the root, all of it disposable):
//!
//! ```text
//! master.m3u8
//! video.m3u8   segment_000.ts segment_001.ts ...
//! audio.m3u8   audio_segment_000.ts audio_segment_001.ts ...
//! ```

use crate::error::{PipelineError, Result};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tracing::{debug, info, warn};

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const VIDEO_PLAYLIST: &str = "video.m3u8";
pub const AUDIO_PLAYLIST: &str = "audio.m3u8";
pub const VIDEO_SEGMENT_TEMPLATE: &str = "segment_%03d.ts";
pub const AUDIO_SEGMENT_TEMPLATE: &str = "audio_segment_%03d.ts";

fn video_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^segment_(\d{3,})\.ts$").expect("valid segment pattern")
    })
}

fn audio_segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^audio_segment_(\d{3,})\.ts$").expect("valid audio segment pattern")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn master_playlist(&self) -> PathBuf {
        self.root.join(MASTER_PLAYLIST)
    }

    /// The primary artifact: its presence means at least one video segment exists.
    pub fn video_playlist(&self) -> PathBuf {
        self.root.join(VIDEO_PLAYLIST)
    }

    pub fn audio_playlist(&self) -> PathBuf {
        self.root.join(AUDIO_PLAYLIST)
    }

    pub fn video_segment_template(&self) -> PathBuf {
        self.root.join(VIDEO_SEGMENT_TEMPLATE)
    }

    pub fn audio_segment_template(&self) -> PathBuf {
        self.root.join(AUDIO_SEGMENT_TEMPLATE)
    }

    pub fn video_segment(&self, index: u64) -> PathBuf {
        self.root.join(format!("segment_{:03}.ts", index))
    }

    pub fn audio_segment(&self, index: u64) -> PathBuf {
        self.root.join(format!("audio_segment_{:03}.ts", index))
    }

    /// Indices of the video segments currently on disk, ascending.
    pub async fn segment_indices(&self) -> io::Result<Vec<u64>> {
        self.indices_matching(video_segment_re()).await
    }

    pub async fn audio_segment_indices(&self) -> io::Result<Vec<u64>> {
        self.indices_matching(audio_segment_re()).await
    }

    async fn indices_matching(&self, re: &Regex) -> io::Result<Vec<u64>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(index) = re
                .captures(name)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }
}

/// Owns the workspace directory: creation, retention and teardown.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn workspace(&self) -> Workspace {
        Workspace {
            root: self.root.clone(),
        }
    }

    /// Create the workspace root (and parents) if absent. Existing content is kept.
    pub async fn ensure(&self) -> Result<Workspace> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| PipelineError::Workspace {
                path: self.root.clone(),
                source,
            })?;
        debug!(root = %self.root.display(), "workspace ready");
        Ok(self.workspace())
    }

    /// Destroy any leftovers, then create an empty workspace.
    pub async fn prepare_fresh(&self) -> Result<Workspace> {
        self.destroy().await?;
        self.ensure().await
    }

    /// Recursively remove the workspace.
    ///
    /// Individual entries that cannot be removed (e.g. still held open by the
    /// transcoder) are logged and skipped. Only an unreadable root is an error.
    pub async fn destroy(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!(root = %self.root.display(), "workspace removed");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "bulk removal failed");
            }
        }

        let failures = remove_tree_best_effort(&self.root)
            .await
            .map_err(|source| PipelineError::Workspace {
                path: self.root.clone(),
                source,
            })?;

        if failures > 0 {
            warn!(root = %self.root.display(), failures, "workspace only partially removed");
        }
        Ok(())
    }

    /// Keep at most `window` video and audio segments, deleting the oldest.
    ///
    /// Returns how many files were removed.
    pub async fn prune_to(&self, window: usize) -> Result<usize> {
        let workspace = self.workspace();
        let io_err = |source| PipelineError::Workspace {
            path: self.root.clone(),
            source,
        };

        let video = workspace.segment_indices().await.map_err(io_err)?;
        let audio = workspace.audio_segment_indices().await.map_err(io_err)?;

        let mut stale = Vec::new();
        if video.len() > window {
            stale.extend(
                video[..video.len() - window]
                    .iter()
                    .map(|&i| workspace.video_segment(i)),
            );
        }
        if audio.len() > window {
            stale.extend(
                audio[..audio.len() - window]
                    .iter()
                    .map(|&i| workspace.audio_segment(i)),
            );
        }

        let mut removed = 0;
        for path in stale {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not prune segment"),
            }
        }
        if removed > 0 {
            debug!(removed, window, "pruned stale segments");
        }
        Ok(removed)
    }
}

async fn remove_tree_best_effort(root: &Path) -> io::Result<usize> {
    let mut failures = 0;
    let mut pending = vec![root.to_path_buf()];
    let mut visited = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not read directory");
                failures += 1;
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                pending.push(path);
            } else if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "could not remove file");
                    failures += 1;
                }
            }
        }
        visited.push(dir);
    }

    // children were visited after their parents
    for dir in visited.into_iter().rev() {
        if let Err(e) = fs::remove_dir(&dir).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "could not remove directory");
                failures += 1;
            }
        }
    }

    Ok(failures)
}
