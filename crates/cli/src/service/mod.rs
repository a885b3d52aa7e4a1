//! Service orchestration module.

mod runner;
mod stats;

pub use runner::{ServiceRunner, RunnerConfig};
pub use stats::RunStats;
