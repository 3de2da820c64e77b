//! Application layer - services composed from domain types and ports.

pub mod lineup;
pub mod pipeline;
pub mod poller;
pub mod supervisor;

pub use lineup::find_channel;
pub use pipeline::LivePipeline;
pub use poller::ReadinessPoller;
pub use supervisor::{SessionHandle, TranscodeOutcome, TranscodeSupervisor};
