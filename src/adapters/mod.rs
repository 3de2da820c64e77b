//! Adapters - Concrete implementations of ports.

pub mod http;
pub mod lineup;
pub mod process;

pub use http::ContentServer;
pub use lineup::HttpLineup;
pub use process::TokioSpawner;
