//! Per-item result artifacts.
//!
//! Before an item is dispatched, [`write_result_skeleton`] lays down an XML
//! document for the backend to fill in. It mirrors the item's location under
//! the results tree: `src/app/main.py` → `results/src/app/main.xml`.
//!
//! At reduce time [`collect_results`] walks that tree and decodes each artifact
//! into a [`ParsedResult`]. Only two parts of the document matter:
//!
//! ```xml
//! <analysis>
//!   <metadata><source_file>src/app/main.py</source_file></metadata>
//!   <scores><security>7</security></scores>
//!   <findings>
//!     <issues>
//!       <issue>
//!         <severity>high</severity>
//!         <category>security</category>
//!         <description>...</description>
//!       </issue>
//!     </issues>
//!   </findings>
//! </analysis>
//! ```
//!
//! Every direct child of a `scores` element is a score and must hold an
//! integer. Every `issue` directly under an `issues` element is a finding whose
//! children map tag → text. A document that can't be decoded is logged and
//! skipped; it never stops the walk.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::models::{Finding, ItemRecord, ParsedResult};

pub const RESULT_EXTENSION: &str = "xml";
const PROCESSOR: &str = "AI-Assistant";

#[derive(Debug, Error, PartialEq)]
pub enum ResultParseError {
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("score <{tag}> is not an integer: '{value}'")]
    InvalidScore { tag: String, value: String },
    #[error("document has no root element")]
    EmptyDocument,
    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

/// Where the result artifact for `item_path` lives under `results_dir`.
///
/// Only the plain directory names of the item path are kept, so the
/// artifact never lands outside `results_dir`.
pub fn result_path(results_dir: &Path, item_path: &str) -> PathBuf {
    let item = Path::new(item_path);
    let stem = item
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| item_path.to_string());
    let mut dir = results_dir.to_path_buf();
    if let Some(parent) = item.parent() {
        for component in parent.components() {
            if let Component::Normal(name) = component {
                dir.push(name);
            }
        }
    }
    dir.join(format!("{}.{}", stem, RESULT_EXTENSION))
}

/// Write the in-progress skeleton for `item`, replacing any earlier attempt.
pub fn write_result_skeleton(results_dir: &Path, item: &ItemRecord) -> Result<PathBuf> {
    let path = result_path(results_dir, &item.path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let language = item
        .field_text("language")
        .unwrap_or_else(|| "Unknown".to_string());
    let loc = item.field_text("loc").unwrap_or_else(|| "0".to_string());
    let processed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<analysis>
  <metadata>
    <source_file>{source}</source_file>
    <language>{language}</language>
    <loc>{loc}</loc>
    <processed_at>{processed_at}</processed_at>
    <processor>{PROCESSOR}</processor>
    <status>in_progress</status>
  </metadata>
  <scores>
    <!-- Scores will be added here -->
  </scores>
  <findings>
    <!-- Findings will be added here -->
  </findings>
  <summary></summary>
  <recommendations>
    <!-- Recommendations will be added here -->
  </recommendations>
</analysis>
"#,
        source = escape(item.path.as_str()),
        language = escape(language.as_str()),
        loc = escape(loc.as_str()),
    );

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Decode one artifact. `fallback_source` names the result when the document
/// carries no `metadata/source_file`.
pub fn parse_result_artifact(
    text: &str,
    fallback_source: &str,
) -> Result<ParsedResult, ResultParseError> {
    let mut reader = quick_xml::Reader::from_str(text);

    // Open elements, innermost last, each with the text seen directly in it.
    let mut stack: Vec<(String, String)> = Vec::new();
    let mut saw_root = false;
    let mut source_file: Option<String> = None;
    let mut scores = BTreeMap::new();
    let mut findings = Vec::new();
    let mut current_issue: Option<BTreeMap<String, String>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "issue" && parent_is(&stack, "issues") {
                    current_issue = Some(BTreeMap::new());
                }
                saw_root = true;
                stack.push((name, String::new()));
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                saw_root = true;
                if name == "issue" && parent_is(&stack, "issues") {
                    findings.push(Finding::default());
                } else {
                    close_element(
                        &stack,
                        name,
                        String::new(),
                        &mut source_file,
                        &mut scores,
                        &mut current_issue,
                    )?;
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ResultParseError::Xml(e.to_string()))?;
                if let Some((_, buf)) = stack.last_mut() {
                    buf.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let Some((_, buf)) = stack.last_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let Some((name, text)) = stack.pop() else {
                    return Err(ResultParseError::Xml("unexpected closing tag".to_string()));
                };
                if name == "issue" && parent_is(&stack, "issues") {
                    if let Some(fields) = current_issue.take() {
                        findings.push(finding_from_fields(fields));
                    }
                } else {
                    close_element(
                        &stack,
                        name,
                        text,
                        &mut source_file,
                        &mut scores,
                        &mut current_issue,
                    )?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ResultParseError::Xml(e.to_string())),
            _ => {}
        }
    }

    if let Some((name, _)) = stack.pop() {
        return Err(ResultParseError::Unclosed(name));
    }
    if !saw_root {
        return Err(ResultParseError::EmptyDocument);
    }

    Ok(ParsedResult {
        source_file: source_file
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| fallback_source.to_string()),
        scores,
        findings,
    })
}

fn parent_is(stack: &[(String, String)], name: &str) -> bool {
    stack.last().is_some_and(|(parent, _)| parent == name)
}

/// Route a just-closed element by its parent. `stack` no longer holds it.
fn close_element(
    stack: &[(String, String)],
    name: String,
    text: String,
    source_file: &mut Option<String>,
    scores: &mut BTreeMap<String, i64>,
    current_issue: &mut Option<BTreeMap<String, String>>,
) -> Result<(), ResultParseError> {
    let parent = stack.last().map(|(p, _)| p.as_str());
    let grandparent = stack
        .len()
        .checked_sub(2)
        .and_then(|i| stack.get(i))
        .map(|(g, _)| g.as_str());
    let value = text.trim();

    match parent {
        Some("scores") => {
            if value.is_empty() {
                return Ok(());
            }
            let score = value
                .parse::<i64>()
                .map_err(|_| ResultParseError::InvalidScore {
                    tag: name.clone(),
                    value: value.to_string(),
                })?;
            scores.insert(name, score);
        }
        Some("issue") if grandparent == Some("issues") => {
            if let Some(fields) = current_issue.as_mut() {
                fields.insert(name, value.to_string());
            }
        }
        Some("metadata") if name == "source_file" => {
            *source_file = Some(value.to_string());
        }
        _ => {}
    }
    Ok(())
}

fn finding_from_fields(mut fields: BTreeMap<String, String>) -> Finding {
    let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_empty());
    Finding {
        severity: take("severity"),
        category: take("category"),
        description: take("description"),
        file: take("file"),
        line: take("line"),
        recommendation: take("recommendation"),
        other: fields,
    }
}

/// Decode every artifact under `results_root`, in path order.
pub fn collect_results(results_root: &Path) -> Vec<ParsedResult> {
    if !results_root.exists() {
        return Vec::new();
    }

    let mut results = Vec::new();
    for entry in WalkDir::new(results_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Could not read results entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(RESULT_EXTENSION)
        {
            continue;
        }

        let fallback = path
            .strip_prefix(results_root)
            .unwrap_or(path)
            .with_extension("")
            .to_string_lossy()
            .to_string();

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", path.display(), e);
                continue;
            }
        };

        match parse_result_artifact(&text, &fallback) {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!("Could not parse {}: {}", path.display(), e),
        }
    }
    results
}
