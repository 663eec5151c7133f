//! Core library for tokentrack.
//!
//! Tracks cumulative token usage for append-only JSONL transcripts. Each
//! tracked file gets a [`tracker::CacheEntry`] that re-reads only the bytes
//! appended since its last scan, and a [`tracker::Registry`] owns the
//! entries, creating them on first request and evicting them when idle.
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokentrack_core::config::TrackerSettings;
//! use tokentrack_core::tracker::{FsNotifier, Registry};
//!
//! let registry = Arc::new(Registry::new(TrackerSettings::default(), Arc::new(FsNotifier)));
//! let snapshot = registry.snapshot("/path/to/session.jsonl").await?;
//! println!("{} output tokens", snapshot.usage.output_tokens);
//! ```

pub mod config;
pub mod tracker;
pub mod usage;
