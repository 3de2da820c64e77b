use crate::domain::transcode::TranscodeCommand;
use crate::ports::process::ProcessSpawner;
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Spawns the transcoder as a child process of this one.
///
/// The child is killed if its handle is dropped, so a crashed supervisor
/// can't leave an orphaned transcoder behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, command: &TranscodeCommand) -> io::Result<Child> {
        Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}
