//! Change notification for tracked transcripts.
//!
//! A notification only means "this file may have grown". Entries always
//! re-stat the file before reading, so duplicate or spurious signals are
//! harmless.

use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use super::error::{Result, TrackerError};

/// Pending signals beyond this are dropped (one queued wake-up is enough)
const SIGNAL_CHANNEL_CAPACITY: usize = 16;

/// Source of "file may have grown" signals
pub trait ChangeNotifier: Send + Sync {
    /// Start watching `path`. Signals arrive on the returned subscription
    /// until it is dropped.
    fn subscribe(&self, path: &Path) -> Result<Subscription>;
}

/// A live watch on one file
pub struct Subscription {
    signals: mpsc::Receiver<()>,
    guard: Box<dyn Send>,
}

impl Subscription {
    /// Bundle a signal receiver with whatever keeps the watch alive
    pub fn new(signals: mpsc::Receiver<()>, guard: impl Send + 'static) -> Self {
        Self {
            signals,
            guard: Box::new(guard),
        }
    }

    /// Split into the signal receiver and the guard that ends the watch on drop
    pub(crate) fn into_parts(self) -> (mpsc::Receiver<()>, Box<dyn Send>) {
        (self.signals, self.guard)
    }
}

/// Notifier backed by the platform file watcher (`notify`)
#[derive(Debug, Default, Clone, Copy)]
pub struct FsNotifier;

impl ChangeNotifier for FsNotifier {
    fn subscribe(&self, path: &Path) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let watched = path.to_path_buf();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => warn!("Watcher error for {}: {}", watched.display(), e),
            })
            .map_err(|e| TrackerError::subscription(path, e))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| TrackerError::subscription(path, e))?;

        Ok(Subscription::new(rx, watcher))
    }
}
