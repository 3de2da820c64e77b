use crate::domain::channels::{parse_lineup, Channel};
use crate::error::{PipelineError, Result};
use crate::ports::lineup::LineupSource;
use async_trait::async_trait;
use std::time::Duration;

/// Fetches a tuner's `lineup.json` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLineup {
    client: reqwest::Client,
}

impl HttpLineup {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Lineup(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LineupSource for HttpLineup {
    async fn fetch(&self, lineup_url: &str) -> Result<Vec<Channel>> {
        let lineup_err = |e: reqwest::Error| PipelineError::Lineup(e.to_string());

        let body = self
            .client
            .get(lineup_url)
            .send()
            .await
            .map_err(lineup_err)?
            .error_for_status()
            .map_err(lineup_err)?
            .bytes()
            .await
            .map_err(lineup_err)?;

        let channels = parse_lineup(&body)?;
        tracing::debug!(lineup_url, count = channels.len(), "lineup fetched");
        Ok(channels)
    }
}
