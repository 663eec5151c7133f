//! Transcript tracking: cache entries, change notification and the registry.

mod entry;
mod error;
pub mod invalidation;
pub mod notifier;
mod registry;
pub mod types;

pub use entry::CacheEntry;
pub use error::{Result, TrackerError};
pub use invalidation::{CacheDrop, InvalidationDetector};
pub use notifier::{ChangeNotifier, FsNotifier, Subscription};
pub use registry::{Registry, SharedRegistry};
pub use types::{EntrySummary, ScanOutcome, TokenSnapshot};
