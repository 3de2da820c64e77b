use crate::domain::channels::Channel;
use crate::error::Result;
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineupSource: Send + Sync {
    /// Fetch the ordered channel list from a device's lineup endpoint
    async fn fetch(&self, lineup_url: &str) -> Result<Vec<Channel>>;
}
