//! TOML configuration parsing and validation.
//!
//! A project is described by one TOML file (default `./mapreduce.toml`):
//!
//! ```toml
//! [project]
//! name = "webapp"
//! version = "1.0"
//! description = "Security review of the web app"
//!
//! [populate]
//! collection_strategy = "git"
//!
//! [populate.item_filters]
//! include_patterns = ["*.py"]
//! exclude_directories = ["vendor"]
//! max_size_bytes = 200000
//!
//! [populate.metadata_extraction]
//! required_fields = ["language", "loc"]
//!
//! [populate.metadata_extraction.fields.language]
//! kind = "extension_title"
//!
//! [map]
//! processing_template = "Review {item_path} and write {output_file}"
//! assessment_dimensions = []
//!
//! [reduce]
//! synthesis_template = "Summarise {issue_count} issues:\n{issues_data}"
//! aggregation_rules = {}
//! ```
//!
//! Missing sections, missing required fields and unknown enum variants are
//! rejected by serde with a message naming the element. Everything else is
//! checked in [`load_config`] before any command touches project state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::ExtractionRule;
use crate::filter::ItemFilter;

/// Item record keys owned by the collector and the catalog. Extraction rules
/// may not target them.
pub const RESERVED_FIELDS: &[&str] = &[
    "path",
    "absolute_path",
    "size",
    "modified",
    "status",
    "processed_at",
];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    pub populate: PopulateConfig,
    pub map: MapConfig,
    pub reduce: ReduceConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, serde::Serialize)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStrategy {
    Filesystem,
    Git,
}

impl std::fmt::Display for CollectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionStrategy::Filesystem => write!(f, "filesystem"),
            CollectionStrategy::Git => write!(f, "git"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PopulateConfig {
    pub collection_strategy: CollectionStrategy,
    pub item_filters: FilterConfig,
    pub metadata_extraction: MetadataConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_directories: Vec<String>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, ExtractionRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapConfig {
    pub processing_template: String,
    pub assessment_dimensions: Vec<AssessmentDimension>,
    #[serde(default)]
    pub output_schema: Option<toml::Table>,
    #[serde(default)]
    pub global_context: Option<GlobalContextConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssessmentDimension {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub specific_instructions: String,
    #[serde(default)]
    pub scoring_rubric: toml::Table,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalContextConfig {
    #[serde(default = "default_context_file")]
    pub context_file: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub sections: Vec<ContextSection>,
    #[serde(default)]
    pub context_update_rules: String,
}

fn default_context_file() -> String {
    "data/global_context.md".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_placeholder() -> String {
    "TBD".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReduceConfig {
    pub synthesis_template: String,
    pub aggregation_rules: toml::Table,
    #[serde(default)]
    pub output_sections: Vec<OutputSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputSection {
    #[serde(default)]
    pub name: Option<String>,
    pub template: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Claude,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_engine")]
    pub engine: EngineKind,
    /// Program plus leading arguments used to reach the backend.
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            command: default_command(),
            extra_args: Vec::new(),
            timeout_secs: None,
            delay_secs: default_delay_secs(),
        }
    }
}

fn default_engine() -> EngineKind {
    EngineKind::Claude
}
fn default_command() -> Vec<String> {
    vec!["claude".to_string()]
}
fn default_delay_secs() -> u64 {
    5
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Directory holding the catalog, results, logs and synthesis output.
    pub fn framework_dir(&self, base: &Path) -> PathBuf {
        base.join(format!("{}-framework", self.project.name))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let name = config.project.name.trim();
    if name.is_empty() {
        bail!("project.name must not be empty");
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        bail!("project.name must be a plain directory name, got '{}'", name);
    }

    if config.map.processing_template.trim().is_empty() {
        bail!("map.processing_template must not be empty");
    }
    if config.reduce.synthesis_template.trim().is_empty() {
        bail!("reduce.synthesis_template must not be empty");
    }

    for field in config.populate.metadata_extraction.fields.keys() {
        if RESERVED_FIELDS.contains(&field.as_str()) {
            bail!(
                "populate.metadata_extraction.fields.{} targets a reserved item field",
                field
            );
        }
    }

    // Compiles every glob so bad patterns fail here rather than mid-populate.
    ItemFilter::new(&config.populate.item_filters)
        .context("Invalid populate.item_filters")?;

    if config.execution.command.is_empty() || config.execution.command[0].trim().is_empty() {
        bail!("execution.command must name a program");
    }
    if config.execution.timeout_secs == Some(0) {
        bail!("execution.timeout_secs must be > 0 when set");
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"
[project]
name = "demo"
version = "1.0"
description = "Demo review"

[populate]
collection_strategy = "filesystem"

[populate.item_filters]
include_patterns = ["*.py"]
exclude_directories = ["vendor"]
max_size_bytes = 1000

[populate.metadata_extraction]
required_fields = ["language", "owner"]

[populate.metadata_extraction.fields.language]
kind = "extension_title"

[populate.metadata_extraction.fields.loc]
kind = "line_count"

[map]
processing_template = "Review {item_path}"
assessment_dimensions = []

[reduce]
synthesis_template = "Summarise {issue_count}"
aggregation_rules = {}
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(
            config.populate.collection_strategy,
            CollectionStrategy::Filesystem
        );
        assert_eq!(config.execution.engine, EngineKind::Claude);
        assert_eq!(config.execution.command, vec!["claude".to_string()]);
        assert_eq!(config.execution.delay_secs, 5);
        assert!(config.execution.timeout().is_none());
        assert_eq!(config.populate.metadata_extraction.fields.len(), 2);
    }

    #[test]
    fn missing_section_is_named() {
        let text = MINIMAL.replace("[reduce]", "[unused]");
        let err = parse_config(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("reduce"), "{:#}", err);
    }

    #[test]
    fn missing_required_field_is_named() {
        let text = MINIMAL.replace("processing_template = \"Review {item_path}\"\n", "");
        let err = parse_config(&text).unwrap_err();
        assert!(
            format!("{:#}", err).contains("processing_template"),
            "{:#}",
            err
        );
    }

    #[test]
    fn unsupported_strategy_rejected() {
        let text = MINIMAL.replace("\"filesystem\"", "\"svn\"");
        let err = parse_config(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("svn"));
    }

    #[test]
    fn unsupported_engine_rejected() {
        let text = format!("{}\n[execution]\nengine = \"gpt\"\n", MINIMAL);
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn reserved_field_rejected() {
        let text = format!(
            "{}\n[populate.metadata_extraction.fields.status]\nkind = \"literal\"\nvalue = \"x\"\n",
            MINIMAL
        );
        let err = parse_config(&text).unwrap_err();
        assert!(format!("{:#}", err).contains("reserved"));
    }

    #[test]
    fn invalid_glob_rejected() {
        let text = MINIMAL.replace("[\"*.py\"]", "[\"[a-\"]");
        assert!(parse_config(&text).is_err());
    }

    #[test]
    fn framework_dir_is_named_after_project() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.framework_dir(Path::new("/work")),
            PathBuf::from("/work/demo-framework")
        );
    }
}
