//! Configuration loaded from the environment.

use crate::domain::transcode::TranscodeSettings;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Configuration for the local transcode-and-serve pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Content server bind address (must be loopback)
    pub addr: IpAddr,
    /// Content server port, 0 for an ephemeral port
    pub port: u16,
    /// Scratch directory holding the HLS workspace
    pub workspace_dir: PathBuf,
    /// Transcoder executable
    pub ffmpeg_bin: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for the first sub-playlist
    pub artifact_timeout: Duration,
    /// Target segment length in seconds
    pub hls_time: u32,
    /// Segments kept in the live sliding window
    pub hls_list_size: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    /// max-age advertised on served files
    pub cache_max_age_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
            workspace_dir: env::temp_dir().join("livetv-hls"),
            ffmpeg_bin: String::from("ffmpeg"),
            poll_interval: Duration::from_millis(500),
            artifact_timeout: Duration::from_secs(30),
            hls_time: 1,
            hls_list_size: 5,
            video_bitrate: String::from("4000k"),
            audio_bitrate: String::from("128k"),
            cache_max_age_secs: 3600,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            addr: parsed(&lookup, "ADDR").unwrap_or(defaults.addr),
            port: parsed(&lookup, "PORT").unwrap_or(defaults.port),
            workspace_dir: lookup("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_dir),
            ffmpeg_bin: lookup("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            poll_interval: parsed(&lookup, "POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            artifact_timeout: parsed(&lookup, "ARTIFACT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.artifact_timeout),
            hls_time: parsed(&lookup, "HLS_TIME").unwrap_or(defaults.hls_time),
            hls_list_size: parsed(&lookup, "HLS_LIST_SIZE").unwrap_or(defaults.hls_list_size),
            video_bitrate: lookup("VIDEO_BITRATE").unwrap_or(defaults.video_bitrate),
            audio_bitrate: lookup("AUDIO_BITRATE").unwrap_or(defaults.audio_bitrate),
            cache_max_age_secs: parsed(&lookup, "CACHE_MAX_AGE_SECS")
                .unwrap_or(defaults.cache_max_age_secs),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }

    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            program: self.ffmpeg_bin.clone(),
            hls_time: self.hls_time,
            list_size: self.hls_list_size,
            video_bitrate: self.video_bitrate.clone(),
            audio_bitrate: self.audio_bitrate.clone(),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting, using default");
            None
        }
    }
}
