//! Filtering and flattening of parsed results for the synthesis pass.

use clap::ValueEnum;
use serde::Serialize;

use crate::config::OutputSection;
use crate::models::ParsedResult;
use crate::template::TemplateVars;

/// Minimum severity a `reduce` run cares about. Each tier admits everything
/// the stricter tiers admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTier {
    High,
    #[default]
    Medium,
    Low,
}

impl SeverityTier {
    pub fn allowed(self) -> &'static [&'static str] {
        match self {
            SeverityTier::High => &["high", "critical"],
            SeverityTier::Medium => &["high", "critical", "medium"],
            SeverityTier::Low => &["high", "critical", "medium", "low"],
        }
    }

    pub fn admits(self, severity: &str) -> bool {
        self.allowed().contains(&severity)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeverityTier::High => "high",
            SeverityTier::Medium => "medium",
            SeverityTier::Low => "low",
        }
    }
}

impl std::fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ALL_CATEGORIES: &str = "all";

/// Keep results that match the category and severity filters.
///
/// A result with no findings passes the severity filter; it still has to
/// pass the category filter, which only `"all"` lets it through.
pub fn filter_results(
    results: Vec<ParsedResult>,
    tier: SeverityTier,
    category: &str,
) -> Vec<ParsedResult> {
    let category = category.trim().to_lowercase();
    results
        .into_iter()
        .filter(|result| {
            if category != ALL_CATEGORIES
                && !result.findings.iter().any(|f| f.category_lower() == category)
            {
                return false;
            }
            result.findings.is_empty()
                || result
                    .findings
                    .iter()
                    .any(|f| tier.admits(&f.severity_lower()))
        })
        .collect()
}

/// Everything the synthesis template can refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisInput {
    pub issue_count: usize,
    pub file_count: usize,
    pub severity: SeverityTier,
    pub category: String,
    pub issues_data: String,
    pub results_data: String,
    pub output_sections: Option<String>,
}

impl SynthesisInput {
    pub fn to_vars(&self) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("issue_count".to_string(), self.issue_count.to_string());
        vars.insert("file_count".to_string(), self.file_count.to_string());
        vars.insert("severity".to_string(), self.severity.to_string());
        vars.insert("category".to_string(), self.category.clone());
        vars.insert("issues_data".to_string(), self.issues_data.clone());
        vars.insert("results_data".to_string(), self.results_data.clone());
        if let Some(sections) = &self.output_sections {
            vars.insert("output_sections".to_string(), sections.clone());
        }
        vars
    }
}

/// Flatten the findings of already-filtered results into one text block.
///
/// Every finding of a surviving result is included, in result order. The
/// `File:` line names the result's source file.
pub fn prepare_synthesis_input(
    results: &[ParsedResult],
    tier: SeverityTier,
    category: &str,
    output_sections: &[OutputSection],
) -> SynthesisInput {
    let mut issues_data = String::new();
    let mut issue_count = 0;

    for result in results {
        for finding in &result.findings {
            issue_count += 1;
            issues_data.push_str(&format!(
                "\n**{} {}**: {}",
                finding
                    .severity
                    .as_deref()
                    .unwrap_or("unknown")
                    .to_uppercase(),
                finding.category.as_deref().unwrap_or("unknown"),
                finding.description.as_deref().unwrap_or("No description"),
            ));
            issues_data.push_str(&format!("\n  File: {}", result.source_file));
            if let Some(line) = &finding.line {
                issues_data.push_str(&format!(":{}", line));
            }
            issues_data.push_str(&format!(
                "\n  Recommendation: {}\n",
                finding
                    .recommendation
                    .as_deref()
                    .unwrap_or("No recommendation")
            ));
        }
    }

    let results_data = serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string());

    let output_sections = if output_sections.is_empty() {
        None
    } else {
        Some(
            output_sections
                .iter()
                .map(|s| format!("\n{}\n", s.template))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    };

    SynthesisInput {
        issue_count,
        file_count: results.len(),
        severity: tier,
        category: category.to_string(),
        issues_data,
        results_data,
        output_sections,
    }
}
