//! Owned snapshot types returned by the tracker.
//!
//! None of these hold a lock; they are safe to pass across await points and
//! to serialize in the web layer.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::usage::UsageCounters;

/// Result of a snapshot read for one transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSnapshot {
    /// Cumulative counters
    pub usage: UsageCounters,
    /// Cache-write tokens of the most recent usage record (not cumulative)
    pub last_cache_create_tokens: u64,
    /// Whether an invalidation was detected within the alert window
    pub cache_rebuilding: bool,
}

/// What a call to `apply_new_content` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Size and modification time matched the watermark; nothing was read
    Unchanged,
    /// New bytes were scanned
    Applied {
        /// Byte offset the scan started from (0 after truncation)
        from: u64,
        /// New watermark size
        to: u64,
        /// Usage records found in the scanned range
        records: usize,
    },
}

/// Diagnostics for one tracked transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub path: PathBuf,
    /// Size at the last completed scan
    pub file_size: u64,
    /// Modification time at the last completed scan
    pub last_modified: Option<DateTime<Utc>>,
    pub last_access: DateTime<Utc>,
    pub tracking_since: DateTime<Utc>,
    pub parse_count: u64,
    pub total_parse_time: Duration,
    pub usage: UsageCounters,
}

impl EntrySummary {
    /// Mean time spent per `apply_new_content` call
    pub fn avg_parse_time(&self) -> Duration {
        match u32::try_from(self.parse_count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_parse_time / count,
            Err(_) => Duration::from_secs_f64(
                self.total_parse_time.as_secs_f64() / self.parse_count as f64,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(parse_count: u64, total_parse_time: Duration) -> EntrySummary {
        let now = Utc::now();
        EntrySummary {
            path: PathBuf::from("/tmp/a.jsonl"),
            file_size: 0,
            last_modified: None,
            last_access: now,
            tracking_since: now,
            parse_count,
            total_parse_time,
            usage: UsageCounters::default(),
        }
    }

    #[test]
    fn test_avg_parse_time() {
        assert_eq!(summary(0, Duration::ZERO).avg_parse_time(), Duration::ZERO);
        assert_eq!(
            summary(4, Duration::from_millis(20)).avg_parse_time(),
            Duration::from_millis(5)
        );
    }
}
