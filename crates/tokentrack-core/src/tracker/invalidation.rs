//! Prompt-cache invalidation detection.
//!
//! The cache-read counter of consecutive messages normally stays flat or
//! grows. When older cached segments expire while newer ones survive, it
//! drops partially instead of to zero. A drop of at least the configured
//! threshold marks the cache as rebuilding for a fixed alert window.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// A cache-read drop large enough to count as an invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDrop {
    /// Last positive cache-read value before the drop
    pub previous: u64,
    /// Cache-read value that triggered the drop
    pub current: u64,
}

impl CacheDrop {
    /// Number of tokens that fell out of the cache
    pub fn tokens(&self) -> u64 {
        self.previous.saturating_sub(self.current)
    }
}

/// Per-transcript invalidation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationDetector {
    last_cache_read: u64,
    invalidated_at: Option<DateTime<Utc>>,
}

impl InvalidationDetector {
    /// Feed the cache-read value of one record.
    ///
    /// Returns the drop when it reaches `threshold`. A later qualifying drop
    /// overwrites the previous invalidation time. Zero readings never reset
    /// the baseline.
    pub fn observe(
        &mut self,
        cache_read: u64,
        threshold: u64,
        now: DateTime<Utc>,
    ) -> Option<CacheDrop> {
        let mut detected = None;

        if self.last_cache_read > 0 && cache_read < self.last_cache_read {
            let drop = CacheDrop {
                previous: self.last_cache_read,
                current: cache_read,
            };
            if drop.tokens() >= threshold {
                self.invalidated_at = Some(now);
                detected = Some(drop);
            }
        }

        if cache_read > 0 {
            self.last_cache_read = cache_read;
        }

        detected
    }

    /// Whether an invalidation happened less than `window` before `now`.
    ///
    /// Pure with respect to the detector: the invalidation time is kept after
    /// the window elapses.
    pub fn is_rebuilding(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let Some(at) = self.invalidated_at else {
            return false;
        };
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(at) < window
    }

    /// Time of the most recent invalidation, if any
    pub fn invalidated_at(&self) -> Option<DateTime<Utc>> {
        self.invalidated_at
    }

    /// Last positive cache-read value seen
    pub fn last_cache_read(&self) -> u64 {
        self.last_cache_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(values: &[u64], threshold: u64, now: DateTime<Utc>) -> InvalidationDetector {
        let mut detector = InvalidationDetector::default();
        for &value in values {
            detector.observe(value, threshold, now);
        }
        detector
    }

    #[test]
    fn test_large_drop_sets_invalidation() {
        let now = Utc::now();
        let mut detector = InvalidationDetector::default();

        assert_eq!(detector.observe(1000, 500, now), None);
        assert_eq!(detector.observe(1000, 500, now), None);
        assert_eq!(
            detector.observe(200, 500, now),
            Some(CacheDrop {
                previous: 1000,
                current: 200
            })
        );
        assert_eq!(detector.invalidated_at(), Some(now));
    }

    #[test]
    fn test_small_drop_is_jitter() {
        let detector = feed(&[1000, 1000, 900], 500, Utc::now());
        assert_eq!(detector.invalidated_at(), None);
        assert_eq!(detector.last_cache_read(), 900);
    }

    #[test]
    fn test_drop_equal_to_threshold_counts() {
        let detector = feed(&[1000, 500], 500, Utc::now());
        assert!(detector.invalidated_at().is_some());
    }

    #[test]
    fn test_zero_reading_keeps_baseline() {
        let now = Utc::now();
        let mut detector = InvalidationDetector::default();
        detector.observe(1000, 500, now);

        // A message without cache activity: a full drop, but baseline is kept
        assert!(detector.observe(0, 500, now).is_some());
        assert_eq!(detector.last_cache_read(), 1000);

        // Next message compares against 1000 again
        assert!(detector.observe(400, 500, now).is_some());
        assert_eq!(detector.last_cache_read(), 400);
    }

    #[test]
    fn test_no_baseline_no_invalidation() {
        let detector = feed(&[0, 0, 5000], 500, Utc::now());
        assert_eq!(detector.invalidated_at(), None);
    }

    #[test]
    fn test_second_drop_overwrites_timestamp() {
        let first = Utc::now();
        let second = first + TimeDelta::seconds(10);
        let mut detector = InvalidationDetector::default();

        detector.observe(5000, 500, first);
        detector.observe(1000, 500, first);
        detector.observe(4000, 500, second);
        detector.observe(2000, 500, second);

        assert_eq!(detector.invalidated_at(), Some(second));
    }

    #[test]
    fn test_rebuilding_window() {
        let at = Utc::now();
        let window = Duration::from_secs(60);
        let detector = feed(&[1000, 1000, 200], 500, at);

        assert!(detector.is_rebuilding(at, window));
        assert!(detector.is_rebuilding(at + TimeDelta::seconds(59), window));
        assert!(!detector.is_rebuilding(at + TimeDelta::seconds(61), window));

        // Sampling after the window does not clear the invalidation
        assert_eq!(detector.invalidated_at(), Some(at));
        assert!(detector.is_rebuilding(at, window));
    }

    #[test]
    fn test_cache_drop_tokens_never_underflows() {
        let rise = CacheDrop {
            previous: 100,
            current: 250,
        };
        assert_eq!(rise.tokens(), 0);
        assert_eq!(
            CacheDrop {
                previous: 250,
                current: 100
            }
            .tokens(),
            150
        );
    }

    #[test]
    fn test_not_rebuilding_without_invalidation() {
        let detector = InvalidationDetector::default();
        assert!(!detector.is_rebuilding(Utc::now(), Duration::from_secs(60)));
    }
}
