//! `tokentrack analyze`: per-message usage report for one transcript.

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};

use tokentrack_core::usage::{CacheEvent, ModelPricing, TranscriptAnalysis};

const RULE_WIDTH: usize = 100;

/// Analyse `path` and print the report to stdout
pub fn run(path: &Path, drop_threshold: u64) -> Result<()> {
    let analysis = TranscriptAnalysis::from_path(path, drop_threshold)
        .with_context(|| format!("Failed to read transcript: {}", path.display()))?;
    print!("{}", render_report(path, &analysis));
    Ok(())
}

/// Compact token count (`950`, `12.3k`, `1.5m`)
pub fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}m", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn event_label(event: CacheEvent) -> String {
    match event {
        CacheEvent::Start => "CACHE START".to_string(),
        CacheEvent::Read => "CACHE READ".to_string(),
        CacheEvent::Invalidation { dropped } => {
            format!("INVALIDATION (-{})", format_number(dropped))
        }
        CacheEvent::Grew { added } => format!("GREW (+{})", format_number(added)),
    }
}

/// Render the full report as text
pub fn render_report(path: &Path, analysis: &TranscriptAnalysis) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "Analyzing: {}\n", path.display());
    let _ = writeln!(
        out,
        "{:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>7} Event",
        "Msg#", "Input", "Output", "CacheR", "CacheC", "Ctx", "Eff%"
    );
    let _ = writeln!(out, "{}", rule);

    for message in &analysis.messages {
        let efficiency = message
            .cache_efficiency()
            .map(|e| format!("{:.2}", e))
            .unwrap_or_else(|| "-".to_string());
        let event = message.event.map(event_label).unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>7} {}",
            message.index,
            format_number(message.usage.input_tokens),
            format_number(message.usage.output_tokens),
            format_number(message.usage.cache_read_input_tokens),
            format_number(message.usage.cache_creation_input_tokens),
            format_number(message.cumulative_input),
            efficiency,
            event
        );
    }

    let totals = &analysis.totals;
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "\nSUMMARY:");
    let _ = writeln!(out, "Total Messages: {}", analysis.messages.len());
    let _ = writeln!(out, "\nInput Tokens:");
    let _ = writeln!(out, "  Fresh (non-cached): {}", format_number(totals.input_tokens));
    let _ = writeln!(out, "  From Cache:         {}", format_number(totals.cache_read_tokens));
    let _ = writeln!(out, "  TOTAL INPUT:        {}", format_number(analysis.total_input()));
    let _ = writeln!(out, "\nOutput Tokens:        {}", format_number(totals.output_tokens));
    let _ = writeln!(out, "Cache Written:        {}", format_number(totals.cache_create_tokens));
    if let Some(efficiency) = analysis.cache_efficiency() {
        let _ = writeln!(out, "\nCache Efficiency: {:.2}%", efficiency);
    }

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "\nPER-MODEL BREAKDOWN & COSTS:");
    for (model, stats) in &analysis.models {
        let _ = writeln!(out, "\n{}:", model);
        let _ = writeln!(out, "  Messages: {}", stats.messages);
        let _ = writeln!(out, "  Input:    {}", format_number(stats.usage.input_tokens));
        let _ = writeln!(out, "  Output:   {}", format_number(stats.usage.output_tokens));
        let _ = writeln!(out, "  Cache R:  {}", format_number(stats.usage.cache_read_tokens));
        let _ = writeln!(out, "  Cache W:  {}", format_number(stats.usage.cache_create_tokens));
        match ModelPricing::for_model(model) {
            Some(pricing) => {
                let _ = writeln!(out, "  Cost:     ${:.4}", stats.cost(&pricing));
            }
            None => {
                let _ = writeln!(out, "  Cost:     Unknown (pricing not available)");
            }
        }
    }

    let total_cost = analysis.total_cost();
    let _ = writeln!(out, "\n{:<20} ${:.4}", "TOTAL COST:", total_cost);

    if let Some(without) = analysis.cost_without_cache() {
        let savings = without - total_cost;
        let _ = writeln!(out, "\nCost without cache:  ${:.2}", without);
        if without > 0.0 {
            let _ = writeln!(
                out,
                "Savings from cache:  ${:.2} ({:.1}%)",
                savings,
                savings / without * 100.0
            );
        }
    }

    out
}
