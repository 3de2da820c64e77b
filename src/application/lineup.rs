use crate::domain::channels::Channel;
use crate::error::{PipelineError, Result};
use crate::ports::lineup::LineupSource;

/// Look up a channel by guide number ("5.1") in a device lineup.
pub async fn find_channel<S: LineupSource + ?Sized>(
    source: &S,
    lineup_url: &str,
    guide_number: &str,
) -> Result<Channel> {
    source
        .fetch(lineup_url)
        .await?
        .into_iter()
        .find(|channel| channel.number == guide_number)
        .ok_or_else(|| {
            let reason = format!("channel {} not in lineup {}", guide_number, lineup_url);
            PipelineError::Lineup(reason)
        })
}
