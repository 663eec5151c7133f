//! Human-readable durations for CLI flags and API output.
//!
//! Accepts Go-style strings such as `500ms`, `60s`, `5m` or `1h30m`.

use std::fmt::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Keyword that disables a timeout
pub const NEVER: &str = "never";

/// Parse a duration like `90s`, `1.5h` or `1h30m`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = s;
    let mut total = Duration::ZERO;

    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let unit_end = tail.find(is_number).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let value: f64 = number
            .parse()
            .with_context(|| format!("invalid duration {:?}", input))?;
        let unit_secs = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => bail!("missing unit in duration {:?}", input),
            other => bail!("unknown unit {:?} in duration {:?}", other, input),
        };
        total += Duration::try_from_secs_f64(value * unit_secs)
            .with_context(|| format!("duration out of range: {:?}", input))?;

        rest = next;
    }

    Ok(total)
}

/// Parse a timeout; `never` disables it
pub fn parse_timeout(input: &str) -> Result<Option<Duration>> {
    if input.trim().eq_ignore_ascii_case(NEVER) {
        return Ok(None);
    }
    parse_duration(input).map(Some)
}

/// Render a duration compactly (`0s`, `250ms`, `1m30s`, `1.5s`, `2h`)
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms < 1000 {
        return format!("{}ms", total_ms);
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let secs = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    if millis > 0 {
        let fraction = format!("{:03}", millis);
        let _ = write!(out, "{}.{}s", secs, fraction.trim_end_matches('0'));
    } else if secs > 0 {
        let _ = write!(out, "{}s", secs);
    }
    out
}

/// Render a timeout, `never` when disabled
pub fn format_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(d) => format_duration(d),
        None => NEVER.to_string(),
    }
}
