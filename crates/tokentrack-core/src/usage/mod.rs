//! Usage accounting: token counters and the transcript record parser.

pub mod analysis;
pub mod parser;
pub mod types;

pub use analysis::{CacheEvent, MessageUsage, ModelPricing, ModelStats, TranscriptAnalysis};
pub use parser::{parse_line, parse_record};
pub use types::{UsageCounters, UsageDelta, UsageRecord};
