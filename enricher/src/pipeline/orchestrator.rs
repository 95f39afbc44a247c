//! Batch Orchestrator
//!
//! Drives one invocation: DEDUP, CACHE_SPLIT, then PROCESS_BATCH until the
//! work runs out, the budget cannot cover the next channel, or the deadline
//! margin is reached, and finally FINALIZE against a fresh store read.
//!
//! Every channel that finishes classification is written to the store
//! before its batch completes, so a crash or timeout loses at most the
//! channels still in flight.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    sync::{Arc, OnceLock},
};

use anyhow::{anyhow, Context};
use futures::{stream, StreamExt};
use indexmap::IndexMap;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{
    dedup::{dedup_entries, KeywordMatcher},
    types::{ChannelEntry, RunOutcome, RunRequest, RunSummary, StopReason},
};
use crate::{
    budget::RunBudget,
    channel::ChannelId,
    enricher_config::OrchestratorConfig,
    error::FetchError,
    observability::{Counter, RunPhase, RunTracker},
    prompt::{ClassificationOutcome, RateLimitedClassifier, ReasoningService},
    store::{EnrichmentRecord, EnrichmentStore},
    youtube::{MetadataSource, QuotaAwareFetcher},
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub store_timeout: Duration,
    pub keywords: Vec<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfig, keywords: &[String]) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            store_timeout: Duration::from_secs(config.store_timeout_secs),
            keywords: keywords.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Persisted,
    /// Refresh failed; the earlier complete record stays in place.
    KeptPrevious,
    StoreFailed,
    /// Left untouched for a later run.
    Deferred,
}

struct BatchResult {
    persisted: Vec<ChannelId>,
    deferred: Vec<ChannelId>,
    halted: Option<StopReason>,
}

pub struct BatchOrchestrator<S, M, R> {
    store: Arc<S>,
    fetcher: QuotaAwareFetcher<M>,
    classifier: RateLimitedClassifier<R>,
    keywords: KeywordMatcher,
    batch_size: usize,
    concurrency: usize,
    store_timeout: Duration,
}

impl<S, M, R> BatchOrchestrator<S, M, R>
where
    S: EnrichmentStore,
    M: MetadataSource,
    R: ReasoningService,
{
    pub fn new(
        store: Arc<S>,
        fetcher: QuotaAwareFetcher<M>,
        classifier: RateLimitedClassifier<R>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            classifier,
            keywords: KeywordMatcher::new(&settings.keywords),
            batch_size: settings.batch_size.max(1),
            concurrency: settings.concurrency.max(1),
            store_timeout: settings.store_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one invocation against `budget`.
    ///
    /// Only a failed cache split is an error: without it the run cannot
    /// tell cached channels apart and would pay for them again.
    pub async fn run(
        &self,
        request: RunRequest,
        budget: &RunBudget,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<RunSummary> {
        let run_id = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let tracker = RunTracker::new(run_id);

        tracker.set_phase(RunPhase::Dedup);
        let deduped = dedup_entries(request.entries);
        tracker.add(Counter::Total, deduped.channels.len() as u64);
        tracker.add(Counter::Invalid, deduped.invalid);
        tracker.add(Counter::UnknownDropped, deduped.unknown_dropped);
        let ids: Vec<ChannelId> = deduped.channels.keys().cloned().collect();

        tracker.set_phase(RunPhase::CacheSplit);
        let cached = self
            .within_store_timeout(self.store.batch_lookup(&ids))
            .await
            .context("Cache split lookup failed")?;

        let mut work: Vec<(ChannelId, ChannelEntry)> = Vec::new();
        // Refreshed channels whose stored record is worth more than a failure
        let mut keep_on_failure: HashSet<ChannelId> = HashSet::new();
        for (channel, entry) in &deduped.channels {
            let Some(existing) = cached.get(channel) else {
                work.push((channel.clone(), entry.clone()));
                continue;
            };
            if request.force_refresh.contains(channel) {
                tracker.incr(Counter::ForcedRefresh);
                if existing.status.is_complete() {
                    keep_on_failure.insert(channel.clone());
                }
                work.push((channel.clone(), entry.clone()));
            } else {
                tracker.incr(Counter::CacheHits);
            }
        }
        tracing::info!(
            "[{}] {} channels: {} cached, {} to enrich",
            tracker.run_id(),
            ids.len(),
            tracker.get(Counter::CacheHits),
            work.len()
        );

        let mut persisted: HashSet<ChannelId> = HashSet::new();
        let mut pending = self.flag_keywords(work, &tracker, &mut persisted).await;

        let mut batch_no = 0;
        let mut deferred: Vec<ChannelId> = Vec::new();
        let stop_reason = loop {
            let Some((next, _)) = pending.front() else {
                break StopReason::AllDone;
            };
            if shutdown.is_cancelled() {
                break StopReason::Shutdown;
            }
            if budget.past_safety_margin() {
                tracing::info!("[{}] Deadline margin reached", tracker.run_id());
                break StopReason::Deadline;
            }
            let next_cost = self.fetcher.declared_cost(next);
            if !budget.can_afford(next_cost) {
                tracing::info!(
                    "[{}] {} units left, next channel needs {}",
                    tracker.run_id(),
                    budget.remaining_units(),
                    next_cost
                );
                break StopReason::QuotaExhausted;
            }

            batch_no += 1;
            tracker.set_phase(RunPhase::ProcessBatch(batch_no));
            let take = self.batch_size.min(pending.len());
            let batch: Vec<_> = pending.drain(..take).collect();

            let result = self
                .process_batch(batch, budget, shutdown, &keep_on_failure, &tracker)
                .await;
            persisted.extend(result.persisted);
            deferred.extend(result.deferred);
            if let Some(reason) = result.halted {
                break reason;
            }
        };

        tracker.set_phase(RunPhase::Finalize);
        deferred.extend(pending.into_iter().map(|(channel, _)| channel));
        tracker.add(Counter::Deferred, deferred.len() as u64);

        let pending = self.pending_after_run(&ids, &cached, &persisted).await;
        let outcome = if pending.is_empty() {
            RunOutcome::Complete
        } else {
            RunOutcome::Partial
        };

        tracing::info!(
            "[{}] Run finished {} ({}), {} channels still pending\n{}",
            tracker.run_id(),
            outcome,
            stop_reason,
            pending.len(),
            tracker.get_status_table(budget.consumed_units())
        );
        tracing::debug!(
            "[{}] Quota {}/{} used; {}",
            tracker.run_id(),
            budget.consumed_units(),
            budget.initial_units(),
            self.classifier.limiters().get_status()
        );

        let weights: IndexMap<ChannelId, u64> = deduped
            .channels
            .into_iter()
            .map(|(channel, entry)| (channel, entry.weight))
            .collect();

        Ok(RunSummary {
            run_id: tracker.run_id().to_string(),
            outcome,
            stop_reason,
            counts: tracker.snapshot(budget.consumed_units()),
            weights,
            pending,
        })
    }

    /// Persist keyword hits straight away; everything else goes on to the
    /// batch loop in input order.
    async fn flag_keywords(
        &self,
        work: Vec<(ChannelId, ChannelEntry)>,
        tracker: &RunTracker,
        persisted: &mut HashSet<ChannelId>,
    ) -> VecDeque<(ChannelId, ChannelEntry)> {
        let mut pending = VecDeque::with_capacity(work.len());
        let mut flagged = Vec::new();

        for (channel, entry) in work {
            let name = entry.placement_name.as_deref().unwrap_or_default();
            match self.keywords.find(name) {
                Some(keyword) => {
                    tracing::debug!("Keyword '{}' flags {}", keyword, channel);
                    flagged.push(EnrichmentRecord::keyword(
                        channel,
                        entry.placement_name.clone(),
                        keyword,
                    ));
                }
                None => pending.push_back((channel, entry)),
            }
        }

        if flagged.is_empty() {
            return pending;
        }

        match self
            .within_store_timeout(self.store.upsert_many(&flagged))
            .await
        {
            Ok(count) => {
                tracker.add(Counter::KeywordFlagged, count as u64);
                persisted.extend(flagged.into_iter().map(|r| r.channel));
            }
            Err(e) => {
                tracing::error!(
                    "Failed to persist {} keyword-flagged channels: {:?}",
                    flagged.len(),
                    e
                );
                tracker.add(Counter::StoreFailures, flagged.len() as u64);
            }
        }

        pending
    }

    async fn process_batch(
        &self,
        batch: Vec<(ChannelId, ChannelEntry)>,
        budget: &RunBudget,
        shutdown: &CancellationToken,
        keep_on_failure: &HashSet<ChannelId>,
        tracker: &RunTracker,
    ) -> BatchResult {
        let halt = OnceLock::new();
        let halt_ref = &halt;

        // `buffered` starts items in input order and yields them in order
        let outcomes: Vec<(ChannelId, ItemOutcome)> = stream::iter(batch)
            .map(|(channel, entry)| async move {
                let keep_previous = keep_on_failure.contains(&channel);
                let outcome = self
                    .process_one(
                        &channel,
                        entry,
                        keep_previous,
                        budget,
                        shutdown,
                        halt_ref,
                        tracker,
                    )
                    .await;
                (channel, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut result = BatchResult {
            persisted: Vec::new(),
            deferred: Vec::new(),
            halted: halt.get().copied(),
        };
        for (channel, outcome) in outcomes {
            match outcome {
                ItemOutcome::Persisted => result.persisted.push(channel),
                ItemOutcome::Deferred => result.deferred.push(channel),
                ItemOutcome::KeptPrevious | ItemOutcome::StoreFailed => {}
            }
        }
        result
    }

    async fn process_one(
        &self,
        channel: &ChannelId,
        entry: ChannelEntry,
        keep_previous: bool,
        budget: &RunBudget,
        shutdown: &CancellationToken,
        halt: &OnceLock<StopReason>,
        tracker: &RunTracker,
    ) -> ItemOutcome {
        if halt.get().is_some() {
            return ItemOutcome::Deferred;
        }
        if shutdown.is_cancelled() {
            let _ = halt.set(StopReason::Shutdown);
            return ItemOutcome::Deferred;
        }
        if budget.past_safety_margin() {
            let _ = halt.set(StopReason::Deadline);
            return ItemOutcome::Deferred;
        }

        let metadata = match self.fetcher.fetch(channel, budget).await {
            Ok(metadata) => {
                tracker.incr(Counter::Fetched);
                metadata
            }
            Err(FetchError::QuotaExhausted) => {
                let _ = halt.set(StopReason::QuotaExhausted);
                return ItemOutcome::Deferred;
            }
            Err(FetchError::DeadlineReached) => {
                let _ = halt.set(StopReason::Deadline);
                return ItemOutcome::Deferred;
            }
            Err(FetchError::Permanent(reason)) => {
                tracing::warn!("Giving up on {}: {}", channel, reason);
                tracker.incr(Counter::FetchFailed);
                if keep_previous {
                    tracing::warn!("Keeping the earlier record for {}", channel);
                    return ItemOutcome::KeptPrevious;
                }
                let record =
                    EnrichmentRecord::fetch_failed(channel.clone(), entry.placement_name, &reason);
                return self.persist(&record, tracker).await;
            }
        };

        let channel_name = metadata.title.clone().or(entry.placement_name);
        let record = match self.classifier.classify(&metadata).await {
            ClassificationOutcome::Classified(classification) => {
                tracker.incr(Counter::Classified);
                EnrichmentRecord::classified(channel.clone(), channel_name, classification)
            }
            ClassificationOutcome::Degraded { reason, .. } if keep_previous => {
                tracing::warn!(
                    "Refresh of {} degraded ({}), keeping the earlier record",
                    channel,
                    reason
                );
                tracker.incr(Counter::Degraded);
                return ItemOutcome::KeptPrevious;
            }
            ClassificationOutcome::Degraded { sentinel, reason } => {
                tracing::warn!("Storing degraded result for {}: {}", channel, reason);
                tracker.incr(Counter::Degraded);
                EnrichmentRecord::degraded(channel.clone(), channel_name, sentinel)
            }
            ClassificationOutcome::Unavailable(_) => {
                let _ = halt.set(StopReason::ReasoningUnavailable);
                return ItemOutcome::Deferred;
            }
        };

        self.persist(&record, tracker).await
    }

    async fn persist(&self, record: &EnrichmentRecord, tracker: &RunTracker) -> ItemOutcome {
        match self.within_store_timeout(self.store.upsert(record)).await {
            Ok(()) => {
                tracing::debug!("Persisted {} as {}", record.channel, record.status);
                ItemOutcome::Persisted
            }
            Err(e) => {
                tracing::error!("Failed to persist {}: {:?}", record.channel, e);
                tracker.incr(Counter::StoreFailures);
                ItemOutcome::StoreFailed
            }
        }
    }

    /// Input channels that still have no record, read fresh from the store.
    /// Falls back to what this run observed if the store cannot be read.
    async fn pending_after_run(
        &self,
        ids: &[ChannelId],
        cached: &HashMap<ChannelId, EnrichmentRecord>,
        persisted: &HashSet<ChannelId>,
    ) -> Vec<ChannelId> {
        match self.within_store_timeout(self.store.batch_lookup(ids)).await {
            Ok(found) => ids
                .iter()
                .filter(|c| !found.contains_key(*c))
                .cloned()
                .collect(),
            Err(e) => {
                tracing::warn!("Could not re-read the store to finalize: {:?}", e);
                ids.iter()
                    .filter(|c| !cached.contains_key(*c) && !persisted.contains(*c))
                    .cloned()
                    .collect()
            }
        }
    }

    async fn within_store_timeout<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| anyhow!("store call timed out after {:?}", self.store_timeout))?
    }
}
