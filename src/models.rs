//! Core data models used throughout the harness.
//!
//! These types represent the items, catalog snapshots, backend outcomes and
//! findings that flow through the populate → map → reduce pipeline.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{CollectionStrategy, ProjectConfig};

/// Processing state of one item. Only ever moves forward:
/// `not_reviewed → in_progress → completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    NotReviewed,
    InProgress,
    Completed,
}

impl ItemStatus {
    /// Both fresh and crash-interrupted items are eligible for `map-next`.
    pub fn is_pending(self) -> bool {
        matches!(self, ItemStatus::NotReviewed | ItemStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::NotReviewed => "not_reviewed",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            ItemStatus::NotReviewed => 0,
            ItemStatus::InProgress => 1,
            ItemStatus::Completed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(self, next: ItemStatus) -> bool {
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered unit of work, keyed by its relative path.
///
/// Extracted metadata fields are flattened beside the fixed fields in the
/// catalog file, so a record reads as a single JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub path: String,
    pub absolute_path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl ItemRecord {
    pub fn new(path: String, absolute_path: String, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path,
            absolute_path,
            size,
            modified,
            status: ItemStatus::NotReviewed,
            processed_at: None,
            fields: BTreeMap::new(),
        }
    }

    /// A metadata field rendered as plain text, if present and non-null.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Generation metadata written alongside the items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub project: ProjectConfig,
    pub generated: DateTime<Utc>,
    pub total_items: usize,
    pub collection_strategy: CollectionStrategy,
}

/// The persisted catalog: item key → record, in population order.
///
/// `metadata` is `None` only for the empty snapshot returned when no catalog
/// file exists yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CatalogMetadata>,
    #[serde(default)]
    pub items: IndexMap<String, ItemRecord>,
}

impl CatalogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a fresh snapshot from collected items. Later duplicates of a key
    /// replace the record but keep the first key's position.
    pub fn from_items(
        project: ProjectConfig,
        strategy: CollectionStrategy,
        items: Vec<ItemRecord>,
    ) -> Self {
        let mut map = IndexMap::with_capacity(items.len());
        for item in items {
            map.insert(item.path.clone(), item);
        }
        Self {
            metadata: Some(CatalogMetadata {
                project,
                generated: Utc::now(),
                total_items: map.len(),
                collection_strategy: strategy,
            }),
            items: map,
        }
    }

    /// True when a catalog has been populated (even with zero items).
    pub fn is_populated(&self) -> bool {
        self.metadata.is_some()
    }
}

/// Which pass is calling the backend. Item runs echo text live; synthesis
/// runs stay quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Item,
    Synthesis,
}

/// Normalized outcome of one backend invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub success: bool,
    pub output_data: Option<String>,
    pub output_lines: Vec<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub duration: Duration,
    pub error_message: Option<String>,
}

impl ProcessingResult {
    pub fn succeeded(output_lines: Vec<String>, duration: Duration) -> Self {
        Self {
            success: true,
            output_data: Some(output_lines.join("\n")),
            output_lines,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            duration,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            output_data: None,
            output_lines: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            cost_usd: 0.0,
            duration,
            error_message: Some(message.into()),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64, cost_usd: f64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self.total_tokens = input_tokens + output_tokens;
        self.cost_usd = cost_usd;
        self
    }

    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("Unknown error")
    }
}

/// One issue reported in a result artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Finding {
    pub severity: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub recommendation: Option<String>,
    /// Any other child elements of the issue, tag → text.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, String>,
}

impl Finding {
    pub fn severity_lower(&self) -> String {
        self.severity.as_deref().unwrap_or_default().trim().to_lowercase()
    }

    pub fn category_lower(&self) -> String {
        self.category.as_deref().unwrap_or_default().trim().to_lowercase()
    }
}

/// Normalized contents of one result artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedResult {
    pub source_file: String,
    pub scores: BTreeMap<String, i64>,
    pub findings: Vec<Finding>,
}
