//! card-harvest CLI: target selection, run orchestration and manifest writers.

pub mod commands;
pub mod output;

pub use commands::RunStatus;
