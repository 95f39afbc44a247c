//! Per-invocation budget
//!
//! Quota units left for the metadata source plus the wall-clock deadline.
//! Shared by `Arc` across the batch workers; every mutation is atomic.

use std::sync::atomic::{
    AtomicBool, AtomicU64,
    Ordering::{AcqRel, Acquire, Relaxed, Release},
};

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct RunBudget {
    initial_units: u64,
    remaining: AtomicU64,
    consumed: AtomicU64,
    exhausted: AtomicBool,
    deadline: Instant,
    safety_margin: Duration,
}

impl RunBudget {
    pub fn new(units: u64, time_limit: Duration, safety_margin: Duration) -> Self {
        Self::with_deadline(units, Instant::now() + time_limit, safety_margin)
    }

    pub fn with_deadline(units: u64, deadline: Instant, safety_margin: Duration) -> Self {
        Self {
            initial_units: units,
            remaining: AtomicU64::new(units),
            consumed: AtomicU64::new(0),
            exhausted: AtomicBool::new(false),
            deadline,
            safety_margin,
        }
    }

    pub fn remaining_units(&self) -> u64 {
        self.remaining.load(Acquire)
    }

    pub fn consumed_units(&self) -> u64 {
        self.consumed.load(Relaxed)
    }

    pub fn initial_units(&self) -> u64 {
        self.initial_units
    }

    pub fn can_afford(&self, cost: u64) -> bool {
        !self.is_exhausted() && self.remaining_units() >= cost
    }

    /// Reserve `cost` units. Fails without touching the balance when fewer
    /// than `cost` units remain, so concurrent callers can never overspend.
    pub fn try_consume(&self, cost: u64) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let reserved = self
            .remaining
            .fetch_update(AcqRel, Acquire, |left| left.checked_sub(cost))
            .is_ok();
        if reserved {
            self.consumed.fetch_add(cost, Relaxed);
        }
        reserved
    }

    /// The service reported its quota as spent, or the next call cannot be
    /// afforded. Nothing else may be consumed for the rest of the run.
    pub fn exhaust(&self) {
        self.remaining.store(0, Release);
        if !self.exhausted.swap(true, AcqRel) {
            tracing::warn!(
                "Quota budget exhausted after {} of {} units",
                self.consumed_units(),
                self.initial_units
            );
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Acquire)
    }

    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// True once less than the safety margin is left before the deadline.
    /// No new fetch may start after this point.
    pub fn past_safety_margin(&self) -> bool {
        self.time_remaining() < self.safety_margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_consume_until_short() {
        let budget = RunBudget::new(10, Duration::from_secs(60), Duration::from_secs(5));
        assert!(budget.try_consume(4));
        assert!(budget.try_consume(4));
        assert!(!budget.try_consume(4));
        assert_eq!(budget.remaining_units(), 2);
        assert_eq!(budget.consumed_units(), 8);
        assert!(budget.can_afford(2));
        assert!(!budget.can_afford(3));
    }

    #[test]
    fn test_exhaust_zeroes_and_blocks() {
        let budget = RunBudget::new(100, Duration::from_secs(60), Duration::from_secs(5));
        budget.exhaust();
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining_units(), 0);
        assert!(!budget.try_consume(0));
        assert!(!budget.can_afford(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_margin() {
        let budget = RunBudget::new(1, Duration::from_secs(10), Duration::from_secs(3));
        assert!(!budget.past_safety_margin());
        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(!budget.past_safety_margin());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(budget.past_safety_margin());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(budget.time_remaining(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_overspend() {
        let budget = Arc::new(RunBudget::new(
            1_000,
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let budget = budget.clone();
                tokio::spawn(async move {
                    let mut granted = 0u64;
                    while budget.try_consume(3) {
                        granted += 3;
                        tokio::task::yield_now().await;
                    }
                    granted
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 999);
        assert_eq!(budget.consumed_units(), 999);
        assert_eq!(budget.remaining_units(), 1);
    }

    proptest! {
        #[test]
        fn prop_consumed_never_exceeds_initial(
            initial in 0u64..500,
            costs in proptest::collection::vec(0u64..50, 0..64),
        ) {
            let budget = RunBudget::new(initial, Duration::from_secs(60), Duration::ZERO);
            let mut granted = 0;
            for cost in costs {
                let before = budget.remaining_units();
                if budget.try_consume(cost) {
                    prop_assert!(cost <= before);
                    granted += cost;
                } else {
                    prop_assert!(cost > before);
                    prop_assert_eq!(budget.remaining_units(), before);
                }
            }
            prop_assert_eq!(budget.consumed_units(), granted);
            prop_assert_eq!(budget.remaining_units(), initial - granted);
        }
    }
}
