use lib_utils::retry::{retry_with_backoff, Retry, RetryError, RetryPolicy};
use tokio::time::Duration;

use super::{Classification, PromptBuilder, ReasoningService};
use crate::{error::ReasoningError, rate_limiters::RateLimiters, youtube::FetchedMetadata};

#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Classified(Classification),
    /// No valid answer after retries, or the request was refused. Carries
    /// the low-confidence sentinel to persist.
    Degraded {
        sentinel: Classification,
        reason: String,
    },
    /// The reasoning service is out of quota or refuses our credentials.
    /// Nothing should be persisted and no further channels should be sent
    /// this run.
    Unavailable(String),
}

/// Calls the reasoning service under the shared [`RateLimiters`], retrying
/// transient and malformed answers.
pub struct RateLimitedClassifier<R> {
    reasoner: R,
    limiters: RateLimiters,
    prompts: PromptBuilder,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl<R: ReasoningService> RateLimitedClassifier<R> {
    pub fn new(
        reasoner: R,
        limiters: RateLimiters,
        prompts: PromptBuilder,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            reasoner,
            limiters,
            prompts,
            retry,
            call_timeout,
        }
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    pub async fn classify(&self, metadata: &FetchedMetadata) -> ClassificationOutcome {
        let request = match self.prompts.build(metadata) {
            Ok(request) => request,
            Err(e) => {
                let reason = format!("prompt could not be built: {:?}", e);
                return ClassificationOutcome::Degraded {
                    sentinel: Classification::degraded(&reason),
                    reason,
                };
            }
        };

        let label = format!("classify {}", metadata.channel);
        let request = &request;
        let result = retry_with_backoff(
            &self.retry,
            &label,
            |_attempt| async move {
                let _permit = self
                    .limiters
                    .acquire_one()
                    .await
                    .map_err(|e| ReasoningError::Request(e.to_string()))?;

                let raw =
                    match tokio::time::timeout(self.call_timeout, self.reasoner.complete(request))
                        .await
                    {
                        Ok(Ok(raw)) => raw,
                        Ok(Err(e @ ReasoningError::RateLimited(_))) => {
                            self.limiters.trigger_backoff();
                            return Err(e);
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Err(ReasoningError::Timeout),
                    };

                Classification::parse(&raw)
            },
            |e| match e {
                ReasoningError::Rejected(_)
                | ReasoningError::QuotaExhausted(_)
                | ReasoningError::Unauthorized(_) => Retry::Terminal,
                _ => Retry::Transient,
            },
        )
        .await;

        match result {
            Ok(classification) => ClassificationOutcome::Classified(classification),
            Err(RetryError::Terminal(ReasoningError::QuotaExhausted(message))) => {
                tracing::error!("Reasoning service out of quota: {}", message);
                ClassificationOutcome::Unavailable(message)
            }
            Err(RetryError::Terminal(ReasoningError::Unauthorized(message))) => {
                tracing::error!("Reasoning service refused our credentials: {}", message);
                ClassificationOutcome::Unavailable(message)
            }
            Err(e) => {
                tracing::warn!("Degrading classification for {}: {}", metadata.channel, e);
                let reason = e.into_inner().to_string();
                ClassificationOutcome::Degraded {
                    sentinel: Classification::degraded(&reason),
                    reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::normalize;
    use crate::testing::fakes::{FakeReasoner, ReasonerReply};

    fn classifier(reasoner: FakeReasoner) -> RateLimitedClassifier<FakeReasoner> {
        RateLimitedClassifier::new(
            reasoner,
            RateLimiters::new(Duration::from_millis(200), 2, Duration::from_secs(30)),
            PromptBuilder::default(),
            RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(2)),
            Duration::from_secs(10),
        )
    }

    fn metadata(title: &str) -> FetchedMetadata {
        let mut metadata = FetchedMetadata::new(normalize(&format!("@{}", title)).unwrap());
        metadata.title = Some(title.to_string());
        metadata
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_answer_is_classified() {
        let reasoner = FakeReasoner::new();
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("alpha")).await;
        let ClassificationOutcome::Classified(c) = outcome else {
            panic!("expected classification, got {:?}", outcome);
        };
        assert_eq!(c.is_children_content(), Some(false));
        assert_eq!(reasoner.calls_for("alpha"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_three_times_degrades() {
        let reasoner = FakeReasoner::new();
        reasoner.script(
            "bravo",
            vec![ReasonerReply::Malformed, ReasonerReply::Malformed, ReasonerReply::Malformed],
        );
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("bravo")).await;
        let ClassificationOutcome::Degraded { sentinel, reason } = outcome else {
            panic!("expected degraded, got {:?}", outcome);
        };
        assert_eq!(sentinel.confidence(), Some("low"));
        assert!(reason.starts_with("malformed classification"));
        assert_eq!(reasoner.calls_for("bravo"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_then_valid_recovers() {
        let reasoner = FakeReasoner::new();
        reasoner.script("charlie", vec![ReasonerReply::Malformed, ReasonerReply::Children]);
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("charlie")).await;
        let ClassificationOutcome::Classified(c) = outcome else {
            panic!("expected classification, got {:?}", outcome);
        };
        assert_eq!(c.is_children_content(), Some(true));
        assert_eq!(reasoner.calls_for("charlie"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_degrades_without_retry() {
        let reasoner = FakeReasoner::new();
        reasoner.script("delta", vec![ReasonerReply::Rejected]);
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("delta")).await;
        assert!(matches!(outcome, ClassificationOutcome::Degraded { .. }));
        assert_eq!(reasoner.calls_for("delta"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_triggers_backoff() {
        let reasoner = FakeReasoner::new();
        reasoner.script("echo", vec![ReasonerReply::RateLimited, ReasonerReply::Valid]);
        let classifier = classifier(reasoner.clone());
        let start = tokio::time::Instant::now();

        let outcome = classifier.classify(&metadata("echo")).await;
        assert!(matches!(outcome, ClassificationOutcome::Classified(_)));
        // Second attempt waits out the 30s backoff window
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_is_unavailable() {
        let reasoner = FakeReasoner::new();
        reasoner.script("foxtrot", vec![ReasonerReply::QuotaExhausted]);
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("foxtrot")).await;
        assert!(matches!(outcome, ClassificationOutcome::Unavailable(_)));
        assert_eq!(reasoner.calls_for("foxtrot"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_credentials_are_unavailable() {
        let reasoner = FakeReasoner::new();
        reasoner.script("golf", vec![ReasonerReply::Unauthorized]);
        let classifier = classifier(reasoner.clone());

        let outcome = classifier.classify(&metadata("golf")).await;
        assert!(matches!(outcome, ClassificationOutcome::Unavailable(_)));
        assert_eq!(reasoner.calls_for("golf"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced() {
        let reasoner = FakeReasoner::new();
        let classifier = classifier(reasoner.clone());
        let start = tokio::time::Instant::now();

        let items = [metadata("golf"), metadata("hotel"), metadata("india")];
        let outcomes = futures::future::join_all(items.iter().map(|m| classifier.classify(m))).await;

        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ClassificationOutcome::Classified(_))));
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
