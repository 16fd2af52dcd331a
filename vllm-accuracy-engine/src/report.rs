//! Fixed-format metric output
//!
//! The benchmark harness greps stdout for `'name': value` lines, so the parse
//! block layout must not change.

use std::fmt::Write;

use crate::perplexity::PerplexityMetrics;

const RULE_WIDTH: usize = 60;

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Title framed by rules, followed by `label: value` lines and a closing rule.
pub fn banner(title: &str, lines: &[(&str, String)]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule());
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", rule());
    for (label, value) in lines {
        let _ = writeln!(out, "{label}: {value}");
    }
    let _ = writeln!(out, "{}", rule());
    out
}

/// Full-precision float in the shortest round-trip form, always with a
/// decimal point (`1` prints as `1.0`).
pub fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = value.to_string();
    if s.contains('.') { s } else { format!("{s}.0") }
}

/// Named scalar metrics in print order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsReport {
    entries: Vec<(String, f64)>,
}

impl MetricsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: f64) -> &mut Self {
        self.entries.push((name.to_string(), value));
        self
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn perplexity(metrics: &PerplexityMetrics) -> Self {
        let mut report = Self::new();
        report
            .push("bits_per_byte", metrics.bits_per_byte)
            .push("byte_perplexity", metrics.byte_perplexity)
            .push("word_perplexity", metrics.word_perplexity);
        report
    }

    pub fn gpqa(metric: f64) -> Self {
        let mut report = Self::new();
        report.push("gpqa_metric", metric);
        report
    }

    /// Human-readable block with four decimals.
    pub fn render_summary(&self) -> String {
        let lines: Vec<(&str, String)> = self
            .entries
            .iter()
            .map(|(name, value)| (name.as_str(), format!("{value:.4}")))
            .collect();
        banner("Accuracy Metrics", &lines)
    }

    /// Block consumed by the benchmark harness.
    pub fn render_parse_block(&self) -> String {
        let mut out = String::from("Metrics for parsing:\n");
        for (name, value) in &self.entries {
            let _ = writeln!(out, "  '{}': {}", name, format_metric_value(*value));
        }
        out
    }

    /// Summary, blank line, parse block.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.render_summary(), self.render_parse_block())
    }
}
