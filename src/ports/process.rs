use crate::domain::transcode::TranscodeCommand;
use std::io;
use tokio::process::Child;

/// Launches the external transcoder.
///
/// Implementations must pipe stderr (it is forwarded to the log) and must not
/// block; the returned child is supervised by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, command: &TranscodeCommand) -> io::Result<Child>;
}
