//! Ports - Trait seams between the pipeline and the outside world.

pub mod lineup;
pub mod process;
