//! Run Tracker
//!
//! Counters for one orchestrator invocation, updated from the batch workers
//! and rendered as a status table when the run finishes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use super::common::{format_counter_table, format_elapsed_secs};

/// Orchestrator state, in the order a run walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Start,
    Dedup,
    CacheSplit,
    ProcessBatch(usize),
    Finalize,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Start => write!(f, "START"),
            RunPhase::Dedup => write!(f, "DEDUP"),
            RunPhase::CacheSplit => write!(f, "CACHE_SPLIT"),
            RunPhase::ProcessBatch(n) => write!(f, "PROCESS_BATCH #{}", n),
            RunPhase::Finalize => write!(f, "FINALIZE"),
        }
    }
}

/// Snapshot of the run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Distinct channels after normalization.
    pub total: u64,
    pub invalid: u64,
    pub unknown_dropped: u64,
    pub cache_hits: u64,
    pub forced_refresh: u64,
    pub keyword_flagged: u64,
    pub fetched: u64,
    pub classified: u64,
    pub degraded: u64,
    pub fetch_failed: u64,
    pub store_failures: u64,
    /// Left for a later run because the budget or the deadline ran out.
    pub deferred: u64,
    pub quota_used: u64,
    pub elapsed_secs: u64,
}

impl RunCounts {
    fn rows(&self) -> Vec<(&'static str, String)> {
        [
            ("Channels", self.total),
            ("Invalid placements", self.invalid),
            ("Unknown dropped", self.unknown_dropped),
            ("Cache hits", self.cache_hits),
            ("Forced refresh", self.forced_refresh),
            ("Keyword flagged", self.keyword_flagged),
            ("Fetched", self.fetched),
            ("Classified", self.classified),
            ("Degraded", self.degraded),
            ("Fetch failures", self.fetch_failed),
            ("Store failures", self.store_failures),
            ("Deferred", self.deferred),
            ("Quota used", self.quota_used),
        ]
        .into_iter()
        .map(|(name, value)| (name, value.to_string()))
        .chain(std::iter::once((
            "Elapsed",
            format_elapsed_secs(self.elapsed_secs),
        )))
        .collect()
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    invalid: AtomicU64,
    unknown_dropped: AtomicU64,
    cache_hits: AtomicU64,
    forced_refresh: AtomicU64,
    keyword_flagged: AtomicU64,
    fetched: AtomicU64,
    classified: AtomicU64,
    degraded: AtomicU64,
    fetch_failed: AtomicU64,
    store_failures: AtomicU64,
    deferred: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Total,
    Invalid,
    UnknownDropped,
    CacheHits,
    ForcedRefresh,
    KeywordFlagged,
    Fetched,
    Classified,
    Degraded,
    FetchFailed,
    StoreFailures,
    Deferred,
}

/// Thread-safe counters for a single run.
#[derive(Clone)]
pub struct RunTracker {
    run_id: String,
    counters: Arc<Counters>,
    phase: Arc<RwLock<RunPhase>>,
    started_at: Instant,
}

impl RunTracker {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            counters: Arc::new(Counters::default()),
            phase: Arc::new(RwLock::new(RunPhase::Start)),
            started_at: Instant::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        let c = &self.counters;
        match counter {
            Counter::Total => &c.total,
            Counter::Invalid => &c.invalid,
            Counter::UnknownDropped => &c.unknown_dropped,
            Counter::CacheHits => &c.cache_hits,
            Counter::ForcedRefresh => &c.forced_refresh,
            Counter::KeywordFlagged => &c.keyword_flagged,
            Counter::Fetched => &c.fetched,
            Counter::Classified => &c.classified,
            Counter::Degraded => &c.degraded,
            Counter::FetchFailed => &c.fetch_failed,
            Counter::StoreFailures => &c.store_failures,
            Counter::Deferred => &c.deferred,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counter(counter).fetch_add(n, Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Relaxed)
    }

    pub fn set_phase(&self, phase: RunPhase) {
        if let Ok(mut current) = self.phase.write() {
            *current = phase;
        }
        info!("[{}] -> {}", self.run_id, phase);
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.read().map(|p| *p).unwrap_or(RunPhase::Start)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self, quota_used: u64) -> RunCounts {
        RunCounts {
            total: self.get(Counter::Total),
            invalid: self.get(Counter::Invalid),
            unknown_dropped: self.get(Counter::UnknownDropped),
            cache_hits: self.get(Counter::CacheHits),
            forced_refresh: self.get(Counter::ForcedRefresh),
            keyword_flagged: self.get(Counter::KeywordFlagged),
            fetched: self.get(Counter::Fetched),
            classified: self.get(Counter::Classified),
            degraded: self.get(Counter::Degraded),
            fetch_failed: self.get(Counter::FetchFailed),
            store_failures: self.get(Counter::StoreFailures),
            deferred: self.get(Counter::Deferred),
            quota_used,
            elapsed_secs: self.elapsed_secs(),
        }
    }

    pub fn get_status_table(&self, quota_used: u64) -> String {
        let title = format!("Run {} ({})", self.run_id, self.phase());
        format_counter_table(&title, &self.snapshot(quota_used).rows())
    }
}
