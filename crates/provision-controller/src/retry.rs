//! Retry/backoff tracking
//!
//! Counts consecutive failures per key and turns the count into a delay.
//! Once the count reaches the configured threshold the key is parked at the
//! generation it failed on; only a change to that generation (an external
//! edit of the claim) makes it eligible again.

use crate::config::{BackoffConfig, BackoffMode};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::time::Duration;

/// Consecutive failures for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Consecutive failures since the last success
    pub count: u32,

    /// When the last failure was recorded
    pub last_failure: DateTime<Utc>,

    /// Generation of the object when the last failure was recorded
    pub generation: u64,
}

/// Per-key failure counter and delay schedule
#[derive(Debug)]
pub struct RetryTracker<K: Eq + Hash> {
    config: BackoffConfig,
    records: DashMap<K, FailureRecord>,
}

impl<K> RetryTracker<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Record a failure at `generation` and return the updated record.
    ///
    /// A failure at a different generation than the previous one starts a
    /// fresh count.
    pub fn record_failure(&self, key: &K, generation: u64) -> FailureRecord {
        let now = Utc::now();
        let mut entry = self.records.entry(key.clone()).or_insert(FailureRecord {
            count: 0,
            last_failure: now,
            generation,
        });
        if entry.generation != generation {
            entry.count = 0;
            entry.generation = generation;
        }
        entry.count = entry.count.saturating_add(1);
        entry.last_failure = now;
        entry.clone()
    }

    /// Clear the failure record
    pub fn record_success(&self, key: &K) {
        self.records.remove(key);
    }

    /// Current consecutive failure count
    pub fn failure_count(&self, key: &K) -> u32 {
        self.records.get(key).map(|r| r.count).unwrap_or(0)
    }

    /// Outstanding failures for `key`, if any
    pub fn record(&self, key: &K) -> Option<FailureRecord> {
        self.records.get(key).map(|r| r.clone())
    }

    /// Delay before attempt `attempt_count + 1`
    pub fn next_delay(&self, attempt_count: u32) -> Duration {
        match self.config.mode {
            BackoffMode::Fixed => self.config.retry_delay,
            BackoffMode::Exponential => {
                let exponent = attempt_count.saturating_sub(1).min(31);
                self.config
                    .base_delay
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(self.config.max_delay)
                    .min(self.config.max_delay)
            }
        }
    }

    /// Whether `attempt_count` failures exhaust the retry budget
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.config.failed_retry_threshold
    }

    /// Whether `key` is parked at `generation`.
    ///
    /// A parked key observed at a newer generation has its record cleared.
    pub fn is_parked(&self, key: &K, generation: u64) -> bool {
        let parked_at = self
            .records
            .get(key)
            .filter(|r| self.is_exhausted(r.count))
            .map(|r| r.generation);
        match parked_at {
            Some(parked) if parked == generation => true,
            Some(_) => {
                self.records.remove(key);
                false
            }
            None => false,
        }
    }

    /// Number of keys with outstanding failures
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker(mode: BackoffMode) -> RetryTracker<String> {
        RetryTracker::new(BackoffConfig {
            mode,
            failed_retry_threshold: 5,
            retry_delay: Duration::from_secs(15),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(122),
            not_ready_delay: Duration::from_secs(2),
        })
    }

    #[test]
    fn test_failures_accumulate_until_exhausted() {
        let tracker = tracker(BackoffMode::Fixed);
        let key = "default/c2".to_string();

        for expected in 1..=4 {
            let attempts = tracker.record_failure(&key, 1).count;
            assert_eq!(attempts, expected);
            assert!(!tracker.is_exhausted(attempts));
        }
        let attempts = tracker.record_failure(&key, 1).count;
        assert_eq!(attempts, 5);
        assert!(tracker.is_exhausted(attempts));
        assert!(tracker.is_parked(&key, 1));
    }

    #[test]
    fn test_success_resets() {
        let tracker = tracker(BackoffMode::Fixed);
        let key = "default/c1".to_string();

        tracker.record_failure(&key, 1);
        tracker.record_failure(&key, 1);
        tracker.record_success(&key);

        assert_eq!(tracker.failure_count(&key), 0);
        assert_eq!(tracker.record_failure(&key, 1).count, 1);
    }

    #[test]
    fn test_new_generation_unparks() {
        let tracker = tracker(BackoffMode::Fixed);
        let key = "default/c2".to_string();
        for _ in 0..5 {
            tracker.record_failure(&key, 3);
        }
        assert!(tracker.is_parked(&key, 3));

        assert!(!tracker.is_parked(&key, 4));
        assert_eq!(tracker.failure_count(&key), 0);
    }

    #[test]
    fn test_failure_at_new_generation_restarts_count() {
        let tracker = tracker(BackoffMode::Fixed);
        let key = "default/c1".to_string();
        tracker.record_failure(&key, 1);
        tracker.record_failure(&key, 1);
        assert_eq!(tracker.record_failure(&key, 2).count, 1);
    }

    #[test]
    fn test_record_tracks_latest_failure() {
        let tracker = tracker(BackoffMode::Fixed);
        let key = "default/c1".to_string();
        assert_eq!(tracker.record(&key), None);

        let first = tracker.record_failure(&key, 1);
        let second = tracker.record_failure(&key, 1);
        assert!(second.last_failure >= first.last_failure);
        assert_eq!(tracker.record(&key), Some(second));

        tracker.record_success(&key);
        assert_eq!(tracker.record(&key), None);
    }

    #[test]
    fn test_fixed_delay() {
        let tracker = tracker(BackoffMode::Fixed);
        assert_eq!(tracker.next_delay(1), Duration::from_secs(15));
        assert_eq!(tracker.next_delay(4), Duration::from_secs(15));
    }

    #[test]
    fn test_exponential_delay() {
        let tracker = tracker(BackoffMode::Exponential);
        assert_eq!(tracker.next_delay(1), Duration::from_millis(500));
        assert_eq!(tracker.next_delay(2), Duration::from_secs(1));
        assert_eq!(tracker.next_delay(3), Duration::from_secs(2));
        assert_eq!(tracker.next_delay(20), Duration::from_secs(122));
        assert_eq!(tracker.next_delay(u32::MAX), Duration::from_secs(122));
    }

    proptest! {
        #[test]
        fn prop_exponential_delay_is_monotonic(a in 0u32..200, b in 0u32..200) {
            let tracker = tracker(BackoffMode::Exponential);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(tracker.next_delay(lo) <= tracker.next_delay(hi));
            prop_assert!(tracker.next_delay(hi) <= Duration::from_secs(122));
        }
    }
}
