//! Filesystem collection strategy.
//!
//! Recursively enumerates regular files under each search root (default: the
//! project base directory). Missing roots are logged and skipped. Roots that
//! resolve outside the base are rejected. The
//! framework directory and `.git` are never descended into, so the catalog and
//! result artifacts don't end up reviewing themselves.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::ItemRecord;

pub fn scan_filesystem(base: &Path, roots: &[String], skip: &Path) -> Result<Vec<ItemRecord>> {
    let base = canonical_base(base)?;
    let skip = skip.canonicalize().unwrap_or_else(|_| skip.to_path_buf());
    let mut items = Vec::new();

    for root in resolve_roots(&base, roots)? {
        if !root.exists() {
            tracing::warn!("Directory not found: {}", root.display());
            continue;
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.path() != skip.as_path() && e.file_name() != ".git");

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&base) else {
                continue;
            };
            let rel_str = relative.to_string_lossy().to_string();

            items.push(file_to_item(path, &rel_str)?);
        }
    }

    Ok(items)
}

/// Resolve search roots against `base`.
///
/// Existing roots come back canonicalized and must lie inside `base`.
/// Missing roots are passed through for the scan to report.
pub fn resolve_roots(base: &Path, roots: &[String]) -> Result<Vec<PathBuf>> {
    let base = canonical_base(base)?;
    let mut resolved = Vec::new();
    for root in search_roots(&base, roots) {
        if !root.exists() {
            resolved.push(root);
            continue;
        }
        let canonical = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        if !canonical.starts_with(&base) {
            bail!(
                "Search root {} is outside the project directory {}",
                root.display(),
                base.display()
            );
        }
        resolved.push(canonical);
    }
    Ok(resolved)
}

fn canonical_base(base: &Path) -> Result<PathBuf> {
    base.canonicalize()
        .with_context(|| format!("Failed to resolve project directory {}", base.display()))
}

fn search_roots(base: &Path, roots: &[String]) -> Vec<PathBuf> {
    if roots.is_empty() {
        return vec![base.to_path_buf()];
    }
    roots
        .iter()
        .map(|r| {
            if r.is_empty() || r == "." {
                base.to_path_buf()
            } else {
                base.join(r)
            }
        })
        .collect()
}

/// Stat one file into a fresh `not_reviewed` record.
pub fn file_to_item(path: &Path, relative_path: &str) -> Result<ItemRecord> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Ok(ItemRecord::new(
        relative_path.to_string(),
        path.to_string_lossy().to_string(),
        metadata.len(),
        modified,
    ))
}
