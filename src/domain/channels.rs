use crate::error::{PipelineError, Result};
use serde::{Deserialize, Deserializer};

/// A tuner channel as advertised by the device lineup (`lineup.json`).
///
/// Only `playback_url` feeds the pipeline; the rest is descriptive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    #[serde(rename = "GuideNumber")]
    pub number: String,
    #[serde(rename = "GuideName")]
    pub name: String,
    #[serde(rename = "VideoCodec", default)]
    pub video_codec: String,
    #[serde(rename = "AudioCodec", default)]
    pub audio_codec: String,
    #[serde(rename = "HD", default, deserialize_with = "int_flag")]
    pub is_hd: bool,
    #[serde(rename = "Favorite", default, deserialize_with = "int_flag")]
    pub is_favorite: bool,
    #[serde(rename = "URL")]
    pub playback_url: String,
}

// The lineup encodes flags as an optional 0/1 integer.
fn int_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u8>::deserialize(deserializer)?.unwrap_or(0) != 0)
}

pub fn parse_lineup(body: &[u8]) -> Result<Vec<Channel>> {
    serde_json::from_slice(body)
        .map_err(|e| PipelineError::Lineup(format!("invalid lineup: {}", e)))
}
