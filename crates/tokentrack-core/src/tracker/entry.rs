//! Per-transcript cache entry with incremental parsing.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::error::{Result, TrackerError};
use super::invalidation::{CacheDrop, InvalidationDetector};
use super::notifier::ChangeNotifier;
use super::types::{EntrySummary, ScanOutcome, TokenSnapshot};
use crate::usage::{parse_line, UsageCounters, UsageDelta};

/// Size and modification time of the last completed scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Watermark {
    size: u64,
    modified: Option<SystemTime>,
}

/// Mutable state of an entry, guarded by one lock
#[derive(Debug)]
struct EntryState {
    watermark: Watermark,
    usage: UsageCounters,
    last_cache_create_tokens: u64,
    detector: InvalidationDetector,
    last_access: DateTime<Utc>,
    started_at: DateTime<Utc>,
    parse_count: u64,
    total_parse_time: Duration,
}

/// Subscription lifecycle, separate from the counters so stopping never
/// waits on a reader
struct Lifecycle {
    watch_guard: Option<Box<dyn Send>>,
    stop_tx: watch::Sender<bool>,
}

/// Tracks one transcript file
pub struct CacheEntry {
    path: PathBuf,
    drop_threshold: u64,
    state: RwLock<EntryState>,
    /// Serializes scans so bytes are applied in file order
    scan_lock: Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    alive: AtomicBool,
}

impl CacheEntry {
    fn new(path: PathBuf, drop_threshold: u64, stop_tx: watch::Sender<bool>) -> Self {
        let now = Utc::now();
        Self {
            path,
            drop_threshold,
            state: RwLock::new(EntryState {
                watermark: Watermark::default(),
                usage: UsageCounters::default(),
                last_cache_create_tokens: 0,
                detector: InvalidationDetector::default(),
                last_access: now,
                started_at: now,
                parse_count: 0,
                total_parse_time: Duration::ZERO,
            }),
            scan_lock: Mutex::new(()),
            lifecycle: Mutex::new(Lifecycle {
                watch_guard: None,
                stop_tx,
            }),
            alive: AtomicBool::new(true),
        }
    }

    /// Create an entry: full initial parse, then subscribe and spawn its worker.
    ///
    /// A second scan runs once the watch is live, picking up anything
    /// appended between the initial parse and the subscription.
    ///
    /// Performs blocking file I/O; must be called inside a tokio runtime.
    pub(crate) fn start(
        path: PathBuf,
        drop_threshold: u64,
        notifier: &dyn ChangeNotifier,
    ) -> Result<Arc<Self>> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let entry = Arc::new(Self::new(path, drop_threshold, stop_tx));

        entry.apply_new_content()?;

        let (signals, guard) = notifier.subscribe(&entry.path)?.into_parts();
        entry.lifecycle.lock().watch_guard = Some(guard);

        // Writes before the watch existed raised no signal
        entry.apply_new_content()?;

        tokio::spawn(Self::watch_loop(Arc::downgrade(&entry), signals, stop_rx));

        Ok(entry)
    }

    /// Worker: wait for change signals and apply new content until stopped
    async fn watch_loop(
        entry: Weak<Self>,
        mut signals: mpsc::Receiver<()>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                signal = signals.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    // Coalesce bursts: one scan covers every queued signal
                    while signals.try_recv().is_ok() {}

                    let Some(entry) = entry.upgrade().filter(|e| e.is_alive()) else {
                        break;
                    };
                    let path = entry.path.clone();
                    match tokio::task::spawn_blocking(move || entry.apply_new_content()).await {
                        Ok(Ok(ScanOutcome::Applied { from, to, records })) => {
                            debug!(
                                "Scanned {} [{}..{}): {} usage records",
                                path.display(),
                                from,
                                to,
                                records
                            );
                        }
                        Ok(Ok(ScanOutcome::Unchanged)) => {}
                        Ok(Err(e)) => warn!("Error parsing {}: {}", path.display(), e),
                        Err(e) => {
                            warn!("Scan task for {} failed: {}", path.display(), e);
                            break;
                        }
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    }

    /// Read whatever was appended since the last scan and merge it in.
    ///
    /// A no-op when size and modification time are unchanged. If the file
    /// shrank, it is read again from the start. Parse count and duration are
    /// recorded whatever the outcome.
    pub fn apply_new_content(&self) -> Result<ScanOutcome> {
        let _scan = self.scan_lock.lock();
        let started = Instant::now();

        let result = self.scan();

        let mut state = self.state.write();
        state.parse_count += 1;
        state.total_parse_time += started.elapsed();
        result
    }

    fn scan(&self) -> Result<ScanOutcome> {
        let metadata =
            std::fs::metadata(&self.path).map_err(|e| TrackerError::io(&self.path, e))?;
        let current = Watermark {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        };

        let previous = self.state.read().watermark;
        if previous == current {
            return Ok(ScanOutcome::Unchanged);
        }

        let from = if previous.size <= current.size {
            previous.size
        } else {
            debug!("{} shrank, re-reading from the start", self.path.display());
            0
        };

        let deltas = read_deltas(&self.path, from, current.size)
            .map_err(|e| TrackerError::io(&self.path, e))?;

        let drops = self.merge(&deltas, current, Utc::now());
        for drop in drops {
            info!(
                "Cache invalidation detected for {}: {} tokens dropped (was {}, now {})",
                self.path.display(),
                drop.tokens(),
                drop.previous,
                drop.current
            );
        }

        Ok(ScanOutcome::Applied {
            from,
            to: current.size,
            records: deltas.len(),
        })
    }

    /// Merge one scan's records and advance the watermark in a single
    /// critical section
    fn merge(
        &self,
        deltas: &[UsageDelta],
        watermark: Watermark,
        now: DateTime<Utc>,
    ) -> Vec<CacheDrop> {
        let mut state = self.state.write();
        let mut drops = Vec::new();

        for delta in deltas {
            state.usage.add(delta);
            state.last_cache_create_tokens = delta.cache_creation_input_tokens;
            if let Some(drop) =
                state
                    .detector
                    .observe(delta.cache_read_input_tokens, self.drop_threshold, now)
            {
                drops.push(drop);
            }
        }
        state.watermark = watermark;

        drops
    }

    /// Stamp the access time and copy out the counters
    pub fn snapshot(&self, now: DateTime<Utc>, rebuild_alert: Duration) -> TokenSnapshot {
        let mut state = self.state.write();
        state.last_access = now;
        TokenSnapshot {
            usage: state.usage,
            last_cache_create_tokens: state.last_cache_create_tokens,
            cache_rebuilding: state.detector.is_rebuilding(now, rebuild_alert),
        }
    }

    /// Diagnostics without touching the access time
    pub fn summary(&self) -> EntrySummary {
        let state = self.state.read();
        EntrySummary {
            path: self.path.clone(),
            file_size: state.watermark.size,
            last_modified: state.watermark.modified.map(DateTime::<Utc>::from),
            last_access: state.last_access,
            tracking_since: state.started_at,
            parse_count: state.parse_count,
            total_parse_time: state.total_parse_time,
            usage: state.usage,
        }
    }

    /// Current cumulative counters
    pub fn usage(&self) -> UsageCounters {
        self.state.read().usage
    }

    /// Invalidation detector state
    pub fn detector(&self) -> InvalidationDetector {
        self.state.read().detector
    }

    /// How long since the last snapshot read
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let last_access = self.state.read().last_access;
        now.signed_duration_since(last_access)
            .to_std()
            .unwrap_or_default()
    }

    /// Stop watching the file and end the worker.
    ///
    /// Returns `false` if the entry was already stopped.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !self.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        lifecycle.watch_guard = None;
        let _ = lifecycle.stop_tx.send(true);
        true
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("path", &self.path)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// Parse the usage records in `[from, to)`.
///
/// Bytes appended after the stat that produced `to` are left for the next
/// scan. Malformed lines are skipped.
fn read_deltas(path: &Path, from: u64, to: u64) -> io::Result<Vec<UsageDelta>> {
    let mut file = File::open(path)?;
    if from > 0 {
        file.seek(SeekFrom::Start(from))?;
    }

    let mut reader = BufReader::new(file.take(to.saturating_sub(from)));
    let mut deltas = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if let Some(delta) = parse_line(&String::from_utf8_lossy(&line)) {
            deltas.push(delta);
        }
    }

    Ok(deltas)
}
