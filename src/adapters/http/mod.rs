//! HTTP inbound adapter.
//!
//! Serves the HLS workspace to the player over a loopback-only listener.

mod server;

pub use server::{router, ContentServer};
