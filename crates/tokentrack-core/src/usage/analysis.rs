//! Offline, per-message analysis of a whole transcript.
//!
//! Walks every usage record in order, labels prompt-cache events, and totals
//! usage per model so a cost estimate can be made with and without caching.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::parser::parse_record;
use super::types::{UsageCounters, UsageDelta};

/// Model name used for records that do not name one
pub const UNKNOWN_MODEL: &str = "unknown";

/// Minimum cache-read growth worth labelling
pub const GROWTH_THRESHOLD: u64 = 1_000;

/// Prompt-cache transition seen at one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    /// First cache write after none
    Start,
    /// First cache read after none
    Read,
    /// Cache-read fell by at least the drop threshold
    Invalidation { dropped: u64 },
    /// Cache-read grew by at least [`GROWTH_THRESHOLD`]
    Grew { added: u64 },
}

impl CacheEvent {
    /// Label the transition from the previous message to `current`.
    ///
    /// Checks run in order and the first match wins.
    pub fn classify(previous: &UsageDelta, current: &UsageDelta, drop_threshold: u64) -> Option<Self> {
        let (prev_read, read) = (
            previous.cache_read_input_tokens,
            current.cache_read_input_tokens,
        );

        if current.cache_creation_input_tokens > 0 && previous.cache_creation_input_tokens == 0 {
            Some(CacheEvent::Start)
        } else if read > 0 && prev_read == 0 {
            Some(CacheEvent::Read)
        } else if prev_read > 0 && read < prev_read {
            let dropped = prev_read - read;
            (dropped >= drop_threshold).then_some(CacheEvent::Invalidation { dropped })
        } else if prev_read > 0 && read > prev_read {
            let added = read - prev_read;
            (added >= GROWTH_THRESHOLD).then_some(CacheEvent::Grew { added })
        } else {
            None
        }
    }
}

/// Price per million tokens, in USD, at the 5-minute cache TTL
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input: f64,
    pub cache_write: f64,
    pub cache_read: f64,
    pub output: f64,
}

impl ModelPricing {
    /// Known pricing for a model id
    pub fn for_model(model: &str) -> Option<Self> {
        let (input, cache_write, cache_read, output) = match model {
            "claude-sonnet-4-5-20250929" | "claude-3-5-sonnet-20241022" => (3.00, 3.75, 0.30, 15.00),
            "claude-3-5-haiku-20250110" => (1.00, 1.25, 0.10, 5.00),
            "claude-3-5-haiku-20241022" => (0.80, 1.00, 0.08, 4.00),
            "claude-opus-4-1-20250514" => (15.00, 18.75, 1.50, 75.00),
            _ => return None,
        };
        Some(Self {
            input,
            cache_write,
            cache_read,
            output,
        })
    }
}

fn per_million(tokens: u64, price: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * price
}

/// One usage record in transcript order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUsage {
    /// 1-based position among usage records
    pub index: usize,
    pub model: String,
    pub usage: UsageDelta,
    /// Running total of fresh input tokens up to and including this message
    pub cumulative_input: u64,
    pub event: Option<CacheEvent>,
}

impl MessageUsage {
    /// Share of input served from cache, in percent; `None` without cache reads
    pub fn cache_efficiency(&self) -> Option<f64> {
        let read = self.usage.cache_read_input_tokens;
        (read > 0).then(|| read as f64 / (self.usage.input_tokens + read) as f64 * 100.0)
    }
}

/// Totals for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelStats {
    pub messages: u64,
    pub usage: UsageCounters,
}

impl ModelStats {
    /// Actual cost with cache reads and writes priced separately
    pub fn cost(&self, pricing: &ModelPricing) -> f64 {
        per_million(self.usage.input_tokens, pricing.input)
            + per_million(self.usage.output_tokens, pricing.output)
            + per_million(self.usage.cache_read_tokens, pricing.cache_read)
            + per_million(self.usage.cache_create_tokens, pricing.cache_write)
    }

    /// Cost had every cached input token been sent fresh
    pub fn cost_without_cache(&self, pricing: &ModelPricing) -> f64 {
        per_million(
            self.usage.input_tokens + self.usage.cache_read_tokens,
            pricing.input,
        ) + per_million(self.usage.output_tokens, pricing.output)
    }
}

/// Result of analysing a transcript
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptAnalysis {
    pub messages: Vec<MessageUsage>,
    pub totals: UsageCounters,
    /// Keyed by model name, sorted
    pub models: BTreeMap<String, ModelStats>,
}

impl TranscriptAnalysis {
    /// Analyse the transcript at `path`
    pub fn from_path(path: impl AsRef<Path>, drop_threshold: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), drop_threshold)
    }

    /// Analyse transcript lines from any reader. Lines without usage are skipped.
    pub fn from_reader(reader: impl BufRead, drop_threshold: u64) -> io::Result<Self> {
        let mut analysis = Self::default();
        let mut previous = UsageDelta::default();

        for line in reader.lines() {
            let Some(record) = parse_record(&line?) else {
                continue;
            };
            let model = record.model.unwrap_or_else(|| UNKNOWN_MODEL.to_string());
            let usage = record.usage;

            analysis.totals.add(&usage);
            let stats = analysis.models.entry(model.clone()).or_default();
            stats.messages += 1;
            stats.usage.add(&usage);

            analysis.messages.push(MessageUsage {
                index: analysis.messages.len() + 1,
                model,
                usage,
                cumulative_input: analysis.totals.input_tokens,
                event: CacheEvent::classify(&previous, &usage, drop_threshold),
            });
            previous = usage;
        }

        Ok(analysis)
    }

    /// Fresh plus cached input tokens
    pub fn total_input(&self) -> u64 {
        self.totals.input_tokens + self.totals.cache_read_tokens
    }

    /// Share of all input served from cache, in percent
    pub fn cache_efficiency(&self) -> Option<f64> {
        let read = self.totals.cache_read_tokens;
        (read > 0).then(|| read as f64 / self.total_input() as f64 * 100.0)
    }

    /// Cost over the models with known pricing
    pub fn total_cost(&self) -> f64 {
        self.priced_models()
            .map(|(stats, pricing)| stats.cost(&pricing))
            .sum()
    }

    /// Cost over the models with known pricing, as if nothing were cached.
    /// `None` when the transcript never read from cache.
    pub fn cost_without_cache(&self) -> Option<f64> {
        if self.totals.cache_read_tokens == 0 {
            return None;
        }
        Some(
            self.priced_models()
                .map(|(stats, pricing)| stats.cost_without_cache(&pricing))
                .sum(),
        )
    }

    fn priced_models(&self) -> impl Iterator<Item = (&ModelStats, ModelPricing)> {
        self.models
            .iter()
            .filter_map(|(model, stats)| ModelPricing::for_model(model).map(|p| (stats, p)))
    }
}
