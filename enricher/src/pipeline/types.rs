use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{channel::ChannelId, observability::RunCounts};

/// One row handed over by the input supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEntry {
    /// Raw placement text, normally a channel URL.
    pub placement: String,
    /// Impressions for this row.
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub placement_name: Option<String>,
}

impl InputEntry {
    pub fn new(placement: impl Into<String>, weight: u64) -> Self {
        Self {
            placement: placement.into(),
            weight,
            placement_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.placement_name = Some(name.into());
        self
    }
}

/// A deduplicated channel with its merged weight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelEntry {
    pub weight: u64,
    pub placement_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub entries: Vec<InputEntry>,
    /// Channels to re-analyze even though they already have a record.
    pub force_refresh: HashSet<ChannelId>,
}

impl RunRequest {
    pub fn new(entries: Vec<InputEntry>) -> Self {
        Self {
            entries,
            force_refresh: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RunOutcome {
    Complete,
    Partial,
}

/// Why the batch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    AllDone,
    QuotaExhausted,
    ReasoningUnavailable,
    Deadline,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub stop_reason: StopReason,
    pub counts: RunCounts,
    /// Merged weight of every input channel, in input order.
    pub weights: IndexMap<ChannelId, u64>,
    /// Input channels still without a record.
    pub pending: Vec<ChannelId>,
}

impl RunSummary {
    pub fn is_partial(&self) -> bool {
        self.outcome == RunOutcome::Partial
    }
}
