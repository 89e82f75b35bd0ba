//! Item Catalog: the durable item → status mapping.
//!
//! The catalog is one JSON file, `<framework>/data/master.json`, read and
//! written whole. It is the only component that changes an item's status,
//! and it only ever moves a status forward.
//!
//! Concurrent drivers against one catalog are not supported. Saves go through
//! a temp file and a rename so an interrupted write never leaves a torn file.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::models::{CatalogSnapshot, ItemRecord, ItemStatus};

pub const CATALOG_FILE: &str = "master.json";

#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CATALOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the snapshot. A missing file is an empty, unpopulated snapshot.
    pub fn load(&self) -> Result<CatalogSnapshot> {
        if !self.path.exists() {
            return Ok(CatalogSnapshot::empty());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read catalog {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog {}", self.path.display()))
    }

    pub fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(snapshot).context("Failed to encode catalog")?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;
        Ok(())
    }
}

/// First item, in population order, that is `not_reviewed` or `in_progress`.
pub fn next_pending(snapshot: &CatalogSnapshot) -> Option<(String, ItemRecord)> {
    snapshot
        .items
        .iter()
        .find(|(_, item)| item.status.is_pending())
        .map(|(key, item)| (key.clone(), item.clone()))
}

fn transition<'a>(
    snapshot: &'a mut CatalogSnapshot,
    key: &str,
    next: ItemStatus,
) -> Result<&'a mut ItemRecord> {
    let Some(item) = snapshot.items.get_mut(key) else {
        bail!("Item '{}' is not in the catalog", key);
    };
    if !item.status.can_advance_to(next) {
        bail!(
            "Item '{}' cannot move from {} to {}",
            key,
            item.status,
            next
        );
    }
    item.status = next;
    Ok(item)
}

pub fn mark_in_progress(snapshot: &mut CatalogSnapshot, key: &str) -> Result<()> {
    transition(snapshot, key, ItemStatus::InProgress)?;
    Ok(())
}

pub fn mark_completed(snapshot: &mut CatalogSnapshot, key: &str, at: DateTime<Utc>) -> Result<()> {
    let item = transition(snapshot, key, ItemStatus::Completed)?;
    item.processed_at = Some(at);
    Ok(())
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub not_reviewed: usize,
    pub in_progress: usize,
    pub completed: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.not_reviewed + self.in_progress + self.completed
    }

    pub fn remaining(&self) -> usize {
        self.not_reviewed + self.in_progress
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        match status {
            ItemStatus::NotReviewed => self.not_reviewed,
            ItemStatus::InProgress => self.in_progress,
            ItemStatus::Completed => self.completed,
        }
    }

    /// Completed share in `0.0..=1.0`; zero for an empty catalog.
    pub fn completion(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.completed as f64 / total as f64,
        }
    }
}

pub fn tally(snapshot: &CatalogSnapshot) -> Tally {
    let mut tally = Tally::default();
    for item in snapshot.items.values() {
        match item.status {
            ItemStatus::NotReviewed => tally.not_reviewed += 1,
            ItemStatus::InProgress => tally.in_progress += 1,
            ItemStatus::Completed => tally.completed += 1,
        }
    }
    tally
}
