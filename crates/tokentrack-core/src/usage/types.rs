//! Token usage types accumulated from transcript records.

use serde::Serialize;

/// Token counts contributed by a single transcript record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    /// Fresh (uncached) input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Tokens served from the prompt cache
    pub cache_read_input_tokens: u64,
    /// Tokens written to the prompt cache
    pub cache_creation_input_tokens: u64,
}

/// A usage record together with the model that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// `message.model`, when the record names one
    pub model: Option<String>,
    pub usage: UsageDelta,
}

/// Cumulative token counters for one transcript
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_create_tokens: u64,
}

impl UsageCounters {
    /// Add one record's contribution
    pub fn add(&mut self, delta: &UsageDelta) {
        self.input_tokens = self.input_tokens.saturating_add(delta.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(delta.output_tokens);
        self.cache_read_tokens = self
            .cache_read_tokens
            .saturating_add(delta.cache_read_input_tokens);
        self.cache_create_tokens = self
            .cache_create_tokens
            .saturating_add(delta.cache_creation_input_tokens);
    }
}
