//! Candidate filtering for `populate`.
//!
//! A candidate survives only if every predicate passes:
//!
//! - no path component equals an excluded directory name
//! - its size does not exceed `max_size_bytes`
//! - it matches at least one include pattern (when any are configured)
//! - it matches no exclude pattern
//!
//! Patterns are glob-style and matched against the relative path from the
//! right, so `*.py` matches `src/app/main.py` and `tests/*.py` matches
//! `pkg/tests/test_a.py`. A pattern starting with `/` or `**/` is used as-is.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

use crate::config::FilterConfig;
use crate::models::ItemRecord;

/// Compiled form of `[populate.item_filters]`.
#[derive(Debug, Clone)]
pub struct ItemFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    exclude_directories: Vec<String>,
    max_size_bytes: Option<u64>,
}

impl ItemFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let include = if config.include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_patterns).context("include_patterns")?)
        };
        let exclude = if config.exclude_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&config.exclude_patterns).context("exclude_patterns")?)
        };

        Ok(Self {
            include,
            exclude,
            exclude_directories: config.exclude_directories.clone(),
            max_size_bytes: config.max_size_bytes,
        })
    }

    pub fn accepts(&self, relative_path: &str, size: u64) -> bool {
        let path = Path::new(relative_path);

        let in_excluded_dir = path.components().any(|c| match c {
            Component::Normal(part) => self
                .exclude_directories
                .iter()
                .any(|d| part.to_str() == Some(d.as_str())),
            _ => false,
        });
        if in_excluded_dir {
            return false;
        }

        if let Some(max) = self.max_size_bytes {
            if size > max {
                return false;
            }
        }

        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }

        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return false;
            }
        }

        true
    }
}

/// Keep the items the filter accepts, preserving their order.
pub fn apply_filters(items: Vec<ItemRecord>, filter: &ItemFilter) -> Vec<ItemRecord> {
    items
        .into_iter()
        .filter(|item| filter.accepts(&item.path, item.size))
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .with_context(|| format!("invalid glob pattern '{}'", pattern))?,
        );
        if !pattern.starts_with('/') && !pattern.starts_with("**/") {
            let anchored = format!("**/{}", pattern);
            builder.add(
                GlobBuilder::new(&anchored)
                    .literal_separator(true)
                    .build()
                    .with_context(|| format!("invalid glob pattern '{}'", pattern))?,
            );
        }
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str], dirs: &[&str], max: Option<u64>) -> ItemFilter {
        ItemFilter::new(&FilterConfig {
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            exclude_directories: dirs.iter().map(|s| s.to_string()).collect(),
            max_size_bytes: max,
        })
        .unwrap()
    }

    #[test]
    fn review_filter_cases() {
        let f = filter(&["*.py"], &[], &["vendor"], Some(1000));
        assert!(!f.accepts("vendor/a.py", 10));
        assert!(f.accepts("src/a.py", 10));
        assert!(!f.accepts("src/a.bin", 10));
        assert!(!f.accepts("src/big.py", 2000));
    }

    #[test]
    fn size_limit_is_inclusive() {
        let f = filter(&[], &[], &[], Some(1000));
        assert!(f.accepts("a.txt", 1000));
        assert!(!f.accepts("a.txt", 1001));
    }

    #[test]
    fn no_include_patterns_accepts_everything() {
        let f = filter(&[], &[], &[], None);
        assert!(f.accepts("deep/nested/file.anything", u64::MAX));
    }

    #[test]
    fn exclude_pattern_wins_over_include() {
        let f = filter(&["*.py"], &["test_*.py"], &[], None);
        assert!(f.accepts("pkg/main.py", 1));
        assert!(!f.accepts("pkg/test_main.py", 1));
    }

    #[test]
    fn patterns_match_from_the_right() {
        let f = filter(&["tests/*.py"], &[], &[], None);
        assert!(f.accepts("tests/a.py", 1));
        assert!(f.accepts("pkg/tests/a.py", 1));
        assert!(!f.accepts("tests/sub/a.py", 1));
        assert!(!f.accepts("src/a.py", 1));
    }

    #[test]
    fn excluded_directory_matches_any_component() {
        let f = filter(&[], &[], &["node_modules"], None);
        assert!(!f.accepts("web/node_modules/pkg/index.js", 1));
        assert!(f.accepts("web/node_modules_backup.js", 1));
    }

    #[test]
    fn apply_filters_preserves_order() {
        let f = filter(&["*.py"], &[], &[], None);
        let now = chrono::Utc::now();
        let items = vec![
            ItemRecord::new("b.py".into(), "/b.py".into(), 1, now),
            ItemRecord::new("c.txt".into(), "/c.txt".into(), 1, now),
            ItemRecord::new("a.py".into(), "/a.py".into(), 1, now),
        ];
        let kept: Vec<String> = apply_filters(items, &f)
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(kept, vec!["b.py", "a.py"]);
    }
}
