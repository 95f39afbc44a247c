//! Observability Module
//!
//! Run counters and the text tables they are logged as.

mod common;
mod run_tracker;

pub use run_tracker::{Counter, RunCounts, RunPhase, RunTracker};
