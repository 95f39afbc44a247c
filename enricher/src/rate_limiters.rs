use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::enricher_config::ClassifyConfig;

/// Call discipline for the reasoning service: a fixed minimum spacing
/// between calls, a cap on calls in flight, and a shared backoff switch
/// flipped when the service starts throttling.
#[derive(Clone)]
pub struct RateLimiters {
    prompt: Arc<RateLimiter>,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(min_spacing: Duration, max_in_flight: usize, backoff_duration: Duration) -> Self {
        let prompt = RateLimiter::builder()
            .initial(1)
            .interval(min_spacing.max(Duration::from_millis(1)))
            .max(1)
            .refill(1)
            .build();
        let max_in_flight = max_in_flight.max(1);

        Self {
            prompt: Arc::new(prompt),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration,
        }
    }

    pub fn from_config(config: &ClassifyConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_spacing_ms),
            config.max_in_flight,
            Duration::from_secs(config.backoff_secs),
        )
    }

    /// Wait for a free in-flight slot and then for the next spacing token.
    /// The slot is held until the returned permit is dropped.
    pub async fn acquire_one(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        let permit = self.in_flight.clone().acquire_owned().await?;
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.prompt.acquire_one().await;
        Ok(permit)
    }

    pub fn trigger_backoff(&self) {
        if self.backoff.swap(true, Relaxed) {
            return;
        }
        tracing::info!("Triggering backoff for {:?}...", self.backoff_duration);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn in_backoff(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn get_status(&self) -> String {
        let in_flight = self.max_in_flight - self.in_flight.available_permits();
        let status = format!(
            "prompts: {}/{} in flight: {}/{}",
            self.prompt.balance(),
            self.prompt.max(),
            in_flight,
            self.max_in_flight
        );
        if self.in_backoff() {
            format!("{} (BACKOFF)", status)
        } else {
            status
        }
    }
}
