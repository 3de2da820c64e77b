//! Domain layer - Pure pipeline logic.

pub mod channels;
pub mod hls;
pub mod session;
pub mod transcode;
pub mod workspace;
