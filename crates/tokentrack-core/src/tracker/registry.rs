//! Registry of tracked transcripts.
//!
//! Owns one [`CacheEntry`] per path, creates entries on first request and
//! runs the eviction and idle-shutdown sweeps. Every query returns owned
//! data; callers never hold a registry lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info};

use super::entry::CacheEntry;
use super::error::{Result, TrackerError};
use super::notifier::ChangeNotifier;
use super::types::{EntrySummary, TokenSnapshot};
use crate::config::TrackerSettings;

/// Shared registry handle
pub type SharedRegistry = Arc<Registry>;

/// Creation slot for one path. Concurrent first requests all wait on the
/// same cell, so only one of them opens the file.
type Slot = Arc<OnceCell<Arc<CacheEntry>>>;

/// Registry of tracked transcripts
pub struct Registry {
    settings: TrackerSettings,
    notifier: Arc<dyn ChangeNotifier>,
    entries: RwLock<HashMap<PathBuf, Slot>>,
    last_request: RwLock<DateTime<Utc>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(settings: TrackerSettings, notifier: Arc<dyn ChangeNotifier>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            notifier,
            entries: RwLock::new(HashMap::new()),
            last_request: RwLock::new(Utc::now()),
            shutdown_tx,
        }
    }

    /// Access the tracker settings
    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    // =========================================================
    // Entry lifecycle
    // =========================================================

    /// Return the entry for `path`, creating it on first request.
    ///
    /// Creation does the initial full parse and subscribes to change
    /// notifications. At most one entry is ever created per path; a failed
    /// creation leaves nothing behind.
    pub async fn get_or_create(&self, path: impl AsRef<Path>) -> Result<Arc<CacheEntry>> {
        let path = path.as_ref();
        if let Some(entry) = self.lookup(path) {
            return Ok(entry);
        }

        let slot = {
            let mut entries = self.entries.write();
            Arc::clone(entries.entry(path.to_path_buf()).or_default())
        };

        let result = slot
            .get_or_try_init(|| self.create(path.to_path_buf()))
            .await
            .cloned();

        if result.is_err() {
            self.discard_empty_slot(path, &slot);
        }
        result
    }

    /// Find an already-created entry
    fn lookup(&self, path: &Path) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .get(path)
            .and_then(|slot| slot.get().cloned())
    }

    async fn create(&self, path: PathBuf) -> Result<Arc<CacheEntry>> {
        let notifier = Arc::clone(&self.notifier);
        let drop_threshold = self.settings.drop_threshold;
        let task_path = path.clone();

        let entry = tokio::task::spawn_blocking(move || {
            CacheEntry::start(task_path, drop_threshold, notifier.as_ref())
        })
        .await
        .map_err(|e| TrackerError::io(&path, std::io::Error::other(e)))??;

        info!("Started tracking: {}", path.display());
        Ok(entry)
    }

    /// Drop a slot whose creation failed, unless someone else filled it since
    fn discard_empty_slot(&self, path: &Path, slot: &Slot) {
        let mut entries = self.entries.write();
        if let Some(current) = entries.get(path) {
            if Arc::ptr_eq(current, slot) && current.get().is_none() {
                entries.remove(path);
            }
        }
    }

    // =========================================================
    // Queries
    // =========================================================

    /// Read the counters for `path`, creating its entry if needed.
    ///
    /// Stamps the entry's access time, which keeps it from being evicted.
    pub async fn snapshot(&self, path: impl AsRef<Path>) -> Result<TokenSnapshot> {
        let entry = self.get_or_create(path).await?;
        Ok(entry.snapshot(Utc::now(), self.settings.rebuild_alert))
    }

    /// Summaries of every tracked transcript, sorted by path
    pub fn list_all(&self) -> Vec<EntrySummary> {
        let entries: Vec<Arc<CacheEntry>> = self
            .entries
            .read()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();

        let mut summaries: Vec<EntrySummary> = entries.iter().map(|e| e.summary()).collect();
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        summaries
    }

    /// Number of tracked transcripts
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================
    // Request bookkeeping and shutdown
    // =========================================================

    /// Record that the daemon served a request
    pub fn touch_request(&self) {
        *self.last_request.write() = Utc::now();
    }

    /// Time of the most recent request
    pub fn last_request(&self) -> DateTime<Utc> {
        *self.last_request.read()
    }

    /// Stop every entry's subscription and worker
    pub fn stop_all(&self) {
        let entries = self.entries.read();
        for (path, slot) in entries.iter() {
            if let Some(entry) = slot.get() {
                if entry.stop() {
                    info!("Stopped tracking: {}", path.display());
                }
            }
        }
    }

    /// Ask the daemon to exit
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Receiver that turns `true` once shutdown was requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    // =========================================================
    // Sweeps
    // =========================================================

    /// Evict entries not read for longer than the session timeout
    pub fn evict_inactive(&self) -> Vec<PathBuf> {
        self.evict_inactive_at(Utc::now())
    }

    pub(crate) fn evict_inactive_at(&self, now: DateTime<Utc>) -> Vec<PathBuf> {
        let Some(timeout) = self.settings.session_timeout else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        let mut entries = self.entries.write();
        entries.retain(|path, slot| {
            let Some(entry) = slot.get() else {
                // Empty and unreferenced: its creator was cancelled mid-flight
                return Arc::strong_count(slot) > 1;
            };
            if entry.idle_for(now) > timeout {
                entry.stop();
                info!("Stopped tracking (inactive): {}", path.display());
                evicted.push(path.clone());
                false
            } else {
                true
            }
        });
        evicted
    }

    /// If no request arrived within the idle timeout, stop everything and
    /// request shutdown. Returns whether shutdown was requested.
    pub fn idle_shutdown_watch(&self) -> bool {
        self.idle_shutdown_watch_at(Utc::now())
    }

    pub(crate) fn idle_shutdown_watch_at(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.settings.idle_timeout else {
            return false;
        };

        let idle_for = now
            .signed_duration_since(self.last_request())
            .to_std()
            .unwrap_or_default();
        if idle_for <= timeout {
            return false;
        }

        info!("No requests for {:?}, shutting down", timeout);
        self.stop_all();
        self.request_shutdown();
        true
    }

    /// Spawn the periodic eviction and idle-shutdown tasks.
    ///
    /// A sweep whose timeout is disabled is not spawned. The tasks end when
    /// the registry is dropped or shutdown is requested.
    pub fn spawn_sweepers(self: &Arc<Self>) {
        let period = self.settings.sweep_interval;

        if self.settings.session_timeout.is_some() {
            let registry = Arc::downgrade(self);
            tokio::spawn(sweep_loop(registry, period, |registry| {
                let evicted = registry.evict_inactive();
                if !evicted.is_empty() {
                    debug!("Evicted {} inactive transcripts", evicted.len());
                }
                false
            }));
        }

        if self.settings.idle_timeout.is_some() {
            let registry = Arc::downgrade(self);
            tokio::spawn(sweep_loop(registry, period, |registry| {
                registry.idle_shutdown_watch()
            }));
        }
    }
}

/// Run `sweep` every `period` until it returns `true`, shutdown is
/// requested, or the registry is gone
async fn sweep_loop(registry: Weak<Registry>, period: Duration, sweep: fn(&Registry) -> bool) {
    let Some(mut shutdown) = registry.upgrade().map(|r| r.shutdown_signal()) else {
        return;
    };
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                if sweep(&registry) {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::notifier::testing::ManualNotifier;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn usage_line(input: u64, cache_read: u64) -> String {
        format!(
            r#"{{"message":{{"usage":{{"input_tokens":{},"output_tokens":1,"cache_read_input_tokens":{}}}}}}}"#,
            input, cache_read
        )
    }

    fn write_transcript(path: &Path, lines: &[String]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn test_registry(settings: TrackerSettings) -> (Arc<Registry>, Arc<ManualNotifier>) {
        let notifier = Arc::new(ManualNotifier::default());
        let registry = Arc::new(Registry::new(settings, notifier.clone()));
        (registry, notifier)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_create_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(10, 0)]);
        let (registry, notifier) = test_registry(TrackerSettings::default());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create(&path).await.unwrap()
            }));
        }
        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap());
        }

        assert_eq!(registry.len(), 1);
        assert_eq!(notifier.subscription_count(), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
        // Initial parse plus the post-subscribe catch-up, for one creation only
        assert_eq!(entries[0].summary().parse_count, 2);
        assert_eq!(entries[0].usage().input_tokens, 10);
    }

    #[tokio::test]
    async fn test_missing_file_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, notifier) = test_registry(TrackerSettings::default());

        let result = registry.get_or_create(dir.path().join("missing.jsonl")).await;

        assert!(matches!(result, Err(TrackerError::Io { .. })));
        assert!(registry.is_empty());
        assert!(registry.entries.read().is_empty());
        assert_eq!(notifier.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_failure_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(1, 0)]);
        let registry = Registry::new(
            TrackerSettings::default(),
            Arc::new(ManualNotifier::failing()),
        );

        let result = registry.snapshot(&path).await;

        assert!(matches!(result, Err(TrackerError::Subscription { .. })));
        assert!(registry.entries.read().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_returns_counters_and_stamps_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(4, 0), usage_line(6, 0)]);
        let (registry, _) = test_registry(TrackerSettings::default());

        let entry = registry.get_or_create(&path).await.unwrap();
        let created_access = entry.summary().last_access;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let snapshot = registry.snapshot(&path).await.unwrap();

        assert_eq!(snapshot.usage.input_tokens, 10);
        assert_eq!(snapshot.usage.output_tokens, 2);
        assert!(!snapshot.cache_rebuilding);
        assert!(entry.summary().last_access > created_access);
    }

    #[tokio::test]
    async fn test_snapshot_reports_rebuilding_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(
            &path,
            &[usage_line(0, 1000), usage_line(0, 1000), usage_line(0, 200)],
        );
        let settings = TrackerSettings {
            drop_threshold: 500,
            ..Default::default()
        };
        let (registry, _) = test_registry(settings);

        let snapshot = registry.snapshot(&path).await.unwrap();

        assert!(snapshot.cache_rebuilding);
        assert_eq!(snapshot.usage.cache_read_tokens, 2200);
    }

    #[tokio::test]
    async fn test_inactive_entry_is_evicted_and_recreated_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(100, 0), usage_line(100, 0)]);
        let settings = TrackerSettings {
            session_timeout: Some(Duration::from_secs(300)),
            ..Default::default()
        };
        let (registry, notifier) = test_registry(settings);

        let old = registry.get_or_create(&path).await.unwrap();
        assert_eq!(old.usage().input_tokens, 200);

        // Not yet idle long enough
        assert!(registry.evict_inactive_at(Utc::now()).is_empty());

        let later = Utc::now() + TimeDelta::seconds(301);
        assert_eq!(registry.evict_inactive_at(later), vec![path.clone()]);
        assert!(registry.is_empty());
        assert!(!old.is_alive());

        write_transcript(&path, &[]);
        let fresh = registry.get_or_create(&path).await.unwrap();

        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.usage(), crate::usage::UsageCounters::default());
        assert_eq!(notifier.subscription_count(), 2);
    }

    #[tokio::test]
    async fn test_sweep_drops_abandoned_empty_slots() {
        let (registry, _) = test_registry(TrackerSettings::default());
        let abandoned = PathBuf::from("/tmp/abandoned.jsonl");
        let pending = PathBuf::from("/tmp/pending.jsonl");
        let in_flight: Slot = Arc::default();
        {
            let mut entries = registry.entries.write();
            entries.insert(abandoned.clone(), Arc::default());
            entries.insert(pending.clone(), Arc::clone(&in_flight));
        }

        assert!(registry.evict_inactive_at(Utc::now()).is_empty());

        let entries = registry.entries.read();
        assert!(!entries.contains_key(&abandoned));
        assert!(entries.contains_key(&pending));
    }

    #[tokio::test]
    async fn test_cancelled_creation_slot_is_swept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(1, 0)]);
        let (registry, _) = test_registry(TrackerSettings::default());

        // Poll once so the slot is inserted, then drop the future mid-creation
        {
            let creation = registry.get_or_create(&path);
            tokio::pin!(creation);
            let first_poll = std::future::poll_fn(|cx| {
                use std::future::Future;
                std::task::Poll::Ready(creation.as_mut().poll(cx).is_ready())
            })
            .await;
            assert!(!first_poll);
        }
        assert_eq!(registry.entries.read().len(), 1);
        assert!(registry.is_empty());

        registry.evict_inactive_at(Utc::now());
        assert!(registry.entries.read().is_empty());

        let entry = registry.get_or_create(&path).await.unwrap();
        assert_eq!(entry.usage().input_tokens, 1);
    }

    #[tokio::test]
    async fn test_eviction_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[]);
        let settings = TrackerSettings {
            session_timeout: None,
            ..Default::default()
        };
        let (registry, _) = test_registry(settings);
        registry.get_or_create(&path).await.unwrap();

        let far_future = Utc::now() + TimeDelta::days(365);
        assert!(registry.evict_inactive_at(far_future).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_shutdown_stops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        write_transcript(&path, &[usage_line(1, 0)]);
        let settings = TrackerSettings {
            idle_timeout: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let (registry, _) = test_registry(settings);
        let entry = registry.get_or_create(&path).await.unwrap();
        let shutdown = registry.shutdown_signal();
        registry.touch_request();

        assert!(!registry.idle_shutdown_watch_at(Utc::now()));
        assert!(!*shutdown.borrow());

        let later = registry.last_request() + TimeDelta::seconds(601);
        assert!(registry.idle_shutdown_watch_at(later));
        assert!(*shutdown.borrow());
        assert!(!entry.is_alive());
    }

    #[tokio::test]
    async fn test_idle_shutdown_disabled() {
        let settings = TrackerSettings {
            idle_timeout: None,
            ..Default::default()
        };
        let (registry, _) = test_registry(settings);

        let far_future = Utc::now() + TimeDelta::days(365);
        assert!(!registry.idle_shutdown_watch_at(far_future));
        assert!(!*registry.shutdown_signal().borrow());
    }

    #[tokio::test]
    async fn test_list_all_sorted_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.jsonl");
        let a = dir.path().join("a.jsonl");
        write_transcript(&b, &[usage_line(2, 0)]);
        write_transcript(&a, &[usage_line(1, 0)]);
        let (registry, _) = test_registry(TrackerSettings::default());

        registry.get_or_create(&b).await.unwrap();
        registry.get_or_create(&a).await.unwrap();

        let summaries = registry.list_all();
        let paths: Vec<&Path> = summaries.iter().map(|s| s.path.as_path()).collect();
        assert_eq!(paths, vec![a.as_path(), b.as_path()]);
        assert_eq!(summaries[0].usage.input_tokens, 1);
        assert_eq!(summaries[1].file_size, std::fs::metadata(&b).unwrap().len());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        write_transcript(&a, &[]);
        write_transcript(&b, &[]);
        let (registry, _) = test_registry(TrackerSettings::default());
        let entry_a = registry.get_or_create(&a).await.unwrap();
        let entry_b = registry.get_or_create(&b).await.unwrap();

        registry.stop_all();
        registry.stop_all();

        assert!(!entry_a.is_alive());
        assert!(!entry_b.is_alive());
    }

    #[tokio::test]
    async fn test_idle_sweeper_requests_shutdown() {
        let settings = TrackerSettings {
            idle_timeout: Some(Duration::from_millis(10)),
            session_timeout: None,
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let (registry, _) = test_registry(settings);
        let mut shutdown = registry.shutdown_signal();

        registry.spawn_sweepers();

        let fired =
            tokio::time::timeout(Duration::from_secs(5), shutdown.wait_for(|&v| v)).await;
        assert!(matches!(fired, Ok(Ok(_))));
    }
}
