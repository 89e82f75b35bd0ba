//! Human-readable reports.
//!
//! Every command that finishes normally prints one of these blocks on
//! **stdout**. Diagnostics go through `tracing` on stderr, so stdout stays a
//! clean report for scripts and for the operator.

use std::time::Duration;

use crate::catalog::Tally;
use crate::models::{ItemStatus, ProcessingResult};

pub const PROGRESS_BAR_WIDTH: usize = 20;

/// Status rows in report order.
const STATUS_ORDER: [ItemStatus; 3] = [
    ItemStatus::Completed,
    ItemStatus::InProgress,
    ItemStatus::NotReviewed,
];

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

pub fn format_duration(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Fixed-width bar: `floor(width * fraction)` filled cells, the rest empty.
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = ((width as f64) * fraction).floor() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Output of `status`.
pub fn render_status(tally: &Tally) -> String {
    let total = tally.total();
    let mut out = String::from("=== Processing Status ===\n");
    out.push_str(&format!("Total items: {}\n", total));
    if total == 0 {
        out.push_str("No items to process.\n");
        return out;
    }

    for status in STATUS_ORDER {
        let count = tally.count(status);
        if count == 0 {
            continue;
        }
        let pct = count as f64 / total as f64 * 100.0;
        out.push_str(&format!("{:15} {:4} ({:5.1}%)\n", status.as_str(), count, pct));
    }

    let completion = tally.completion();
    out.push_str(&format!(
        "Progress: [{}] {:.1}%\n",
        progress_bar(completion, PROGRESS_BAR_WIDTH),
        completion * 100.0
    ));
    out
}

fn usage_lines(result: &ProcessingResult) -> String {
    if result.total_tokens == 0 {
        return String::new();
    }
    format!(
        "Tokens: {} in + {} out = {} total\nCost: ${:.4}\n",
        format_number(result.input_tokens),
        format_number(result.output_tokens),
        format_number(result.total_tokens),
        result.cost_usd
    )
}

/// Output of a successful `map-next`.
pub fn render_processing_summary(key: &str, result: &ProcessingResult, tally: &Tally) -> String {
    let mut out = String::from("✓ Processing completed!\n=== Processing Summary ===\n");
    out.push_str(&format!("Item: {}\n", key));
    out.push_str(&format!("Duration: {}\n", format_duration(result.duration)));
    out.push_str(&usage_lines(result));
    out.push_str(&format!(
        "Progress: {}/{} items ({} remaining)\n",
        tally.completed,
        tally.total(),
        tally.remaining()
    ));
    out
}

/// Output of a successful `reduce`.
pub fn render_synthesis_summary(results: usize, result: &ProcessingResult) -> String {
    let mut out = String::from("=== Synthesis Summary ===\n");
    out.push_str(&format!("Results processed: {}\n", results));
    out.push_str(&format!("Duration: {}\n", format_duration(result.duration)));
    out.push_str(&usage_lines(result));
    out
}
