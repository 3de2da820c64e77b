//! Error types for the live transcoding pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure category kept in the session state.
///
/// Consumers only need to know that a request failed and can be retried;
/// the kind is preserved for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Workspace,
    PlaylistWrite,
    TranscodeProcess,
    ServerBind,
    ServerNotRunning,
    ArtifactTimeout,
    Cancelled,
    Lineup,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Workspace error at {path:?}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write playlist {path:?}: {source}")]
    PlaylistWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcode process error: {0}")]
    TranscodeProcess(String),

    #[error("Failed to bind content server on {addr}: {reason}")]
    ServerBind { addr: SocketAddr, reason: String },

    #[error("Content server is not running")]
    ServerNotRunning,

    #[error("Artifact {path:?} did not appear within {waited:?}")]
    ArtifactTimeout { path: PathBuf, waited: Duration },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Live request failed: {0:?}")]
    RequestFailed(FailureKind),

    #[error("Lineup error: {0}")]
    Lineup(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Workspace { .. } => FailureKind::Workspace,
            PipelineError::PlaylistWrite { .. } => FailureKind::PlaylistWrite,
            PipelineError::TranscodeProcess(_) => FailureKind::TranscodeProcess,
            PipelineError::ServerBind { .. } => FailureKind::ServerBind,
            PipelineError::ServerNotRunning => FailureKind::ServerNotRunning,
            PipelineError::ArtifactTimeout { .. } => FailureKind::ArtifactTimeout,
            PipelineError::Cancelled => FailureKind::Cancelled,
            PipelineError::RequestFailed(kind) => *kind,
            PipelineError::Lineup(_) => FailureKind::Lineup,
        }
    }
}

impl From<FailureKind> for PipelineError {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Cancelled => PipelineError::Cancelled,
            FailureKind::ServerNotRunning => PipelineError::ServerNotRunning,
            other => PipelineError::RequestFailed(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
