//! Livetv - local live-stream HLS pipeline
//!
//! Turns a tuner's live MPEG-TS URL into an HLS stream on a loopback HTTP
//! server so a local player can consume it.
//!
//! Hexagonal Architecture:
//! - domain/: Pure logic (workspace layout, playlists, transcode command, session state, lineup)
//! - ports/: Trait definitions (process spawning, lineup source)
//! - adapters/: Concrete implementations (tokio process, axum content server, reqwest lineup)
//! - application/: Services (supervisor, readiness poller, pipeline)
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use adapters::{ContentServer, HttpLineup, TokioSpawner};
pub use application::LivePipeline;
pub use config::PipelineConfig;
pub use domain::session::{SessionPhase, SessionSnapshot, SessionState};
pub use error::{FailureKind, PipelineError, Result};
