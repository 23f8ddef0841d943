//! Station orchestration module.

mod orchestrator;
mod stats;
mod transport;

pub use orchestrator::Station;
pub use stats::SessionStats;
