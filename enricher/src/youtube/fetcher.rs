use lib_utils::retry::{retry_with_backoff, Retry, RetryError, RetryPolicy};
use tokio::time::Duration;

use super::{FetchedMetadata, MetadataSource};
use crate::{
    budget::RunBudget,
    channel::ChannelId,
    error::{FetchError, SourceError},
};

/// Why a single attempt failed.
#[derive(Debug)]
enum AttemptError {
    OutOfBudget,
    PastDeadline,
    Source(SourceError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::OutOfBudget => write!(f, "budget cannot cover the call"),
            AttemptError::PastDeadline => write!(f, "deadline safety margin reached"),
            AttemptError::Source(e) => write!(f, "{}", e),
        }
    }
}

/// Wraps a [`MetadataSource`] with the run budget and the retry policy.
///
/// Every attempt reserves its declared cost first. A quota signal from the
/// service zeroes the budget and ends the fetch without retrying; any other
/// failure is retried until the policy gives up.
pub struct QuotaAwareFetcher<M> {
    source: M,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<M: MetadataSource> QuotaAwareFetcher<M> {
    pub fn new(source: M, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            source,
            retry,
            call_timeout,
        }
    }

    pub fn declared_cost(&self, channel: &ChannelId) -> u64 {
        self.source.declared_cost(channel)
    }

    pub async fn fetch(
        &self,
        channel: &ChannelId,
        budget: &RunBudget,
    ) -> Result<FetchedMetadata, FetchError> {
        let cost = self.source.declared_cost(channel);
        let label = format!("fetch {}", channel);

        let result = retry_with_backoff(
            &self.retry,
            &label,
            |attempt| async move {
                if attempt > 0 && budget.past_safety_margin() {
                    return Err(AttemptError::PastDeadline);
                }
                if !budget.try_consume(cost) {
                    return Err(AttemptError::OutOfBudget);
                }
                match tokio::time::timeout(self.call_timeout, self.source.resolve(channel)).await {
                    Ok(Ok(metadata)) => Ok(metadata),
                    Ok(Err(e)) => Err(AttemptError::Source(e)),
                    Err(_) => Err(AttemptError::Source(SourceError::Timeout)),
                }
            },
            |e| match e {
                AttemptError::Source(SourceError::QuotaExceeded(_))
                | AttemptError::OutOfBudget
                | AttemptError::PastDeadline => Retry::Terminal,
                AttemptError::Source(_) => Retry::Transient,
            },
        )
        .await;

        match result {
            Ok(metadata) => Ok(metadata),
            Err(RetryError::Terminal(AttemptError::PastDeadline)) => {
                Err(FetchError::DeadlineReached)
            }
            Err(RetryError::Terminal(AttemptError::OutOfBudget)) => {
                tracing::info!(
                    "Budget cannot cover {} units for {} ({} left)",
                    cost,
                    channel,
                    budget.remaining_units()
                );
                budget.exhaust();
                Err(FetchError::QuotaExhausted)
            }
            Err(RetryError::Terminal(AttemptError::Source(e))) => {
                tracing::warn!("Metadata source refused {}: {}", channel, e);
                budget.exhaust();
                Err(FetchError::QuotaExhausted)
            }
            Err(RetryError::Exhausted { last, .. }) => Err(FetchError::Permanent(last.to_string())),
        }
    }
}
