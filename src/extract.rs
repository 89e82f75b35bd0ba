//! Declarative metadata extraction for collected items.
//!
//! Each configured field names one [`ExtractionRule`]. Rules run once at
//! populate time; a rule that fails yields `null` for that field only and
//! never drops the item. Fields listed in `required_fields` that no rule
//! produced are written as explicit `null`s so consumers can rely on the key.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::config::MetadataConfig;
use crate::models::ItemRecord;

/// How one metadata field is derived.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRule {
    /// A fixed string.
    Literal { value: String },
    /// Any TOML value, passed through unchanged.
    Constant { value: Value },
    /// The file extension, title-cased (`rs` → `Rs`, none → empty string).
    ExtensionTitle,
    /// Number of lines in the file, read in full.
    LineCount,
}

type Extractor = fn(&ExtractionRule, &ItemRecord) -> Result<Value>;

impl ExtractionRule {
    fn extractor(&self) -> Extractor {
        match self {
            ExtractionRule::Literal { .. } | ExtractionRule::Constant { .. } => constant_value,
            ExtractionRule::ExtensionTitle => extension_title,
            ExtractionRule::LineCount => line_count,
        }
    }

    /// Apply the rule to one item, degrading any failure to `null`.
    pub fn apply(&self, item: &ItemRecord) -> Value {
        match (self.extractor())(self, item) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(path = %item.path, rule = ?self, "metadata extraction failed: {:#}", e);
                Value::Null
            }
        }
    }
}

fn constant_value(rule: &ExtractionRule, _item: &ItemRecord) -> Result<Value> {
    Ok(match rule {
        ExtractionRule::Literal { value } => Value::String(value.clone()),
        ExtractionRule::Constant { value } => value.clone(),
        _ => Value::Null,
    })
}

fn extension_title(_rule: &ExtractionRule, item: &ItemRecord) -> Result<Value> {
    let ext = Path::new(&item.path)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Value::String(title_case(&ext)))
}

fn line_count(_rule: &ExtractionRule, item: &ItemRecord) -> Result<Value> {
    let bytes = std::fs::read(&item.absolute_path)
        .with_context(|| format!("Failed to read {}", item.absolute_path))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(Value::from(text.lines().count() as u64))
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Run every configured rule over every item.
pub fn extract_metadata(items: Vec<ItemRecord>, config: &MetadataConfig) -> Vec<ItemRecord> {
    items
        .into_iter()
        .map(|mut item| {
            for (field, rule) in &config.fields {
                let value = rule.apply(&item);
                item.fields.insert(field.clone(), value);
            }
            for field in &config.required_fields {
                if is_fixed_field(field) {
                    continue;
                }
                item.fields.entry(field.clone()).or_insert(Value::Null);
            }
            item
        })
        .collect()
}

fn is_fixed_field(name: &str) -> bool {
    crate::config::RESERVED_FIELDS.contains(&name)
}
