//! Construction of the live HLS transcoder invocation.

use crate::domain::workspace::Workspace;
use std::ffi::OsString;

/// Used for the advertised variant bandwidth when a configured bitrate can't
/// be parsed.
const FALLBACK_VIDEO_BPS: u64 = 4_000_000;
const FALLBACK_AUDIO_BPS: u64 = 128_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub program: String,
    /// Segment length in seconds
    pub hls_time: u32,
    /// Sliding window size in segments
    pub list_size: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            hls_time: 1,
            list_size: 5,
            video_bitrate: "4000k".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl TranscodeSettings {
    /// BANDWIDTH hint for the master playlist: video cap plus audio.
    pub fn bandwidth_hint(&self) -> u64 {
        let video = parse_bitrate(&self.video_bitrate).unwrap_or(FALLBACK_VIDEO_BPS);
        let audio = parse_bitrate(&self.audio_bitrate).unwrap_or(FALLBACK_AUDIO_BPS);
        video.saturating_add(audio)
    }
}

/// Parse an ffmpeg-style bitrate ("4000k", "4M", "128000") into bits per second.
///
/// Values that don't fit in a `u64` are rejected.
pub fn parse_bitrate(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last()? {
        'k' | 'K' => (&raw[..raw.len() - 1], 1_000),
        'm' | 'M' => (&raw[..raw.len() - 1], 1_000_000),
        _ => (raw, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// A fully built transcoder invocation. Opaque to everything except the spawner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    pub program: String,
    pub input_url: String,
    pub args: Vec<OsString>,
}

impl TranscodeCommand {
    /// First video and first audio stream of `input_url`, re-encoded into two
    /// live HLS renditions inside `workspace`.
    pub fn build(input_url: &str, workspace: &Workspace, settings: &TranscodeSettings) -> Self {
        let hls_time = settings.hls_time.max(1).to_string();
        let list_size = settings.list_size.to_string();
        let bufsize = parse_bitrate(&settings.video_bitrate)
            .map(|bps| format!("{}k", bps / 1000 * 2))
            .unwrap_or_else(|| settings.video_bitrate.clone());

        let mut args: Vec<OsString> = Vec::new();
        let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));

        push(&["-hide_banner", "-loglevel", "warning", "-nostdin", "-y"]);
        push(&["-i", input_url]);

        // video rendition
        push(&["-map", "0:v:0", "-an"]);
        push(&["-c:v", "libx264", "-preset", "veryfast", "-vf", "yadif"]);
        push(&[
            "-b:v",
            settings.video_bitrate.as_str(),
            "-maxrate",
            settings.video_bitrate.as_str(),
            "-bufsize",
            bufsize.as_str(),
        ]);
        let keyframes = format!("expr:gte(t,n_forced*{})", hls_time);
        push(&["-force_key_frames", keyframes.as_str()]);
        push_hls_output(&mut push, &hls_time, &list_size);
        args.push("-hls_segment_filename".into());
        args.push(workspace.video_segment_template().into_os_string());
        args.push(workspace.video_playlist().into_os_string());

        // audio rendition
        let mut push = |values: &[&str]| args.extend(values.iter().map(OsString::from));
        push(&["-map", "0:a:0", "-vn"]);
        push(&[
            "-c:a",
            "aac",
            "-b:a",
            settings.audio_bitrate.as_str(),
            "-ac",
            "2",
        ]);
        push_hls_output(&mut push, &hls_time, &list_size);
        args.push("-hls_segment_filename".into());
        args.push(workspace.audio_segment_template().into_os_string());
        args.push(workspace.audio_playlist().into_os_string());

        Self {
            program: settings.program.clone(),
            input_url: input_url.to_string(),
            args,
        }
    }
}

fn push_hls_output(push: &mut impl FnMut(&[&str]), hls_time: &str, list_size: &str) {
    push(&[
        "-f",
        "hls",
        "-hls_time",
        hls_time,
        "-hls_list_size",
        list_size,
        "-hls_flags",
        "delete_segments+independent_segments",
        "-start_number",
        "0",
    ]);
}
