//! Parse token usage out of a single transcript line.

use serde_json::Value;

use super::types::{UsageDelta, UsageRecord};

/// Lines without this marker are skipped before any JSON decoding
pub const USAGE_MARKER: &str = "\"usage\"";

/// Extract the usage contribution of one JSONL transcript line.
///
/// The usage object is looked up under `message.usage` first and then at the
/// top level. Lines that are not JSON, or carry no usage object, yield `None`.
///
/// Expected shape (assistant record):
/// ```text
/// {"type":"assistant","message":{"usage":{"input_tokens":3,"output_tokens":120,
///   "cache_read_input_tokens":45210,"cache_creation_input_tokens":812}}}
/// ```
pub fn parse_line(line: &str) -> Option<UsageDelta> {
    parse_record(line).map(|record| record.usage)
}

/// Like [`parse_line`], also keeping the `message.model` the record names
pub fn parse_record(line: &str) -> Option<UsageRecord> {
    if !line.contains(USAGE_MARKER) {
        return None;
    }

    let record: Value = serde_json::from_str(line).ok()?;
    let message = record.get("message");
    let usage = message
        .and_then(|message| message.get("usage"))
        .filter(|usage| usage.is_object())
        .or_else(|| record.get("usage").filter(|usage| usage.is_object()))?;

    Some(UsageRecord {
        model: message
            .and_then(|message| message.get("model"))
            .and_then(Value::as_str)
            .map(str::to_string),
        usage: UsageDelta {
            input_tokens: token_count(usage, "input_tokens"),
            output_tokens: token_count(usage, "output_tokens"),
            cache_read_input_tokens: token_count(usage, "cache_read_input_tokens"),
            cache_creation_input_tokens: token_count(usage, "cache_creation_input_tokens"),
        },
    })
}

/// Read a token count field, treating missing, negative and non-numeric values as zero
fn token_count(usage: &Value, key: &str) -> u64 {
    let Some(value) = usage.get(key) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|n| n.is_finite() && *n > 0.0)
                .map(|n| n as u64)
        })
        .unwrap_or(0)
}
