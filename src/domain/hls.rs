use crate::domain::workspace::{Workspace, AUDIO_PLAYLIST, VIDEO_PLAYLIST};
use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub const AUDIO_GROUP: &str = "audio";

pub struct AudioRendition {
    pub group_id: String,
    pub name: String,
    pub language: String,
    pub uri: String,
    pub autoselect: bool,
    pub default: bool,
}

pub struct VariantStream {
    pub bandwidth: u64,
    pub audio_group: Option<String>,
    pub uri: String,
}

pub struct MasterPlaylist {
    pub version: u8,
    pub independent_segments: bool,
    pub audio: Vec<AudioRendition>,
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self {
            version: 3,
            independent_segments: false,
            audio: Vec::new(),
            variants: Vec::new(),
        }
    }

    /// The fixed live layout: one English audio rendition and one video variant
    /// carrying it.
    pub fn live(bandwidth: u64) -> Self {
        let mut playlist = Self::new();
        playlist.independent_segments = true;
        playlist.audio.push(AudioRendition {
            group_id: AUDIO_GROUP.to_string(),
            name: "English".to_string(),
            language: "en".to_string(),
            uri: AUDIO_PLAYLIST.to_string(),
            autoselect: true,
            default: true,
        });
        playlist.variants.push(VariantStream {
            bandwidth,
            audio_group: Some(AUDIO_GROUP.to_string()),
            uri: VIDEO_PLAYLIST.to_string(),
        });
        playlist
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));

        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        for audio in &self.audio {
            out.push_str(&format!(
                "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"{}\",NAME=\"{}\",LANGUAGE=\"{}\",AUTOSELECT={},DEFAULT={},URI=\"{}\"\n",
                audio.group_id,
                audio.name,
                audio.language,
                yes_no(audio.autoselect),
                yes_no(audio.default),
                audio.uri
            ));
        }

        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={}",
                variant.bandwidth
            ));
            if let Some(group) = &variant.audio_group {
                out.push_str(&format!(",AUDIO=\"{}\"", group));
            }
            out.push('\n');
            out.push_str(&variant.uri);
            out.push('\n');
        }

        out
    }

    /// Write the playlist and flush it to disk.
    ///
    /// The content goes to a sibling temp file first and is renamed into place,
    /// so readers never observe a partial playlist.
    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let temp_path = path.with_extension("m3u8.tmp");

        let mut file = File::create(&temp_path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Write the master playlist into the workspace. Must succeed before any
/// transcoder is launched.
pub async fn write_master_playlist(workspace: &Workspace, bandwidth: u64) -> Result<PathBuf> {
    let path = workspace.master_playlist();
    MasterPlaylist::live(bandwidth)
        .write_to(&path)
        .await
        .map_err(|source| PipelineError::PlaylistWrite {
            path: path.clone(),
            source,
        })?;
    tracing::debug!(path = %path.display(), bandwidth, "master playlist written");
    Ok(path)
}
