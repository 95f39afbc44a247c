//! Enrichment pipeline
//!
//! Input in, deduplicated and cache-split channels through the batch
//! orchestrator, cumulative report out.

mod dedup;
mod input;
mod invocation;
mod orchestrator;
mod types;

pub use dedup::{dedup_entries, Deduped, KeywordMatcher};
pub use input::{InputSupplier, JsonFileInput};
pub use invocation::Invocation;
pub use orchestrator::{BatchOrchestrator, OrchestratorSettings};
pub use types::{ChannelEntry, InputEntry, RunOutcome, RunRequest, RunSummary, StopReason};
