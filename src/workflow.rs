//! Workflow Driver: populate → map → reduce.
//!
//! Sequences the catalog, the collectors, the processing engine and the
//! result aggregator. Each public method backs one CLI command:
//!
//! | Command | Method |
//! |---------|--------|
//! | `populate [ROOTS...]` | [`Workflow::populate`] |
//! | `map-next` | [`Workflow::map_next`] |
//! | `map-all [--delay N]` | [`Workflow::map_all`] |
//! | `status` | [`Workflow::status`] |
//! | `reduce [--severity S] [--category C]` | [`Workflow::reduce`] |
//!
//! An item is marked `in_progress` and saved before the engine is invoked, so
//! a crash or a failed run leaves it to be picked up again by the next
//! `map-next`. Only a successful run marks it `completed`, against a freshly
//! reloaded catalog.

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::aggregate::{filter_results, prepare_synthesis_input, SeverityTier, SynthesisInput};
use crate::catalog::{self, Catalog, Tally};
use crate::config::{CollectionStrategy, Config};
use crate::connector_fs;
use crate::connector_git;
use crate::context::load_global_context;
use crate::engine::ProcessingEngine;
use crate::extract::{extract_metadata, title_case};
use crate::filter::{apply_filters, ItemFilter};
use crate::models::{CatalogSnapshot, ItemRecord, ProcessingResult};
use crate::progress;
use crate::results::{collect_results, write_result_skeleton};
use crate::template::{render_template, unresolved_variables, TemplateVars};

/// Failures the operator needs to tell apart.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Framework not initialized. Run populate first.")]
    NotInitialized,
    #[error("No catalog found. Run populate first.")]
    NotPopulated,
    #[error("Processing engine '{0}' is not available")]
    EngineUnavailable(String),
    #[error("Processing failed for {key}: {message}. Check log: {}", .log.display())]
    ProcessingFailed {
        key: String,
        message: String,
        log: PathBuf,
    },
    #[error("Synthesis failed: {message}. Check log: {}", .log.display())]
    SynthesisFailed { message: String, log: PathBuf },
}

/// Directories under `<base>/<project>-framework`.
#[derive(Debug, Clone)]
pub struct FrameworkPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub results: PathBuf,
    pub logs: PathBuf,
    pub synthesis: PathBuf,
}

impl FrameworkPaths {
    pub fn new(root: PathBuf) -> Self {
        Self {
            data: root.join("data"),
            results: root.join("results"),
            logs: root.join("logs"),
            synthesis: root.join("synthesis"),
            root,
        }
    }

    fn create_all(&self) -> Result<()> {
        for dir in [&self.data, &self.results, &self.logs, &self.synthesis] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulateSummary {
    pub collected: usize,
    pub kept: usize,
    pub catalog_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Processed { key: String, result: ProcessingResult },
    AllDone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReduceOutcome {
    NoResults,
    NothingMatched,
    Synthesized {
        path: PathBuf,
        input: SynthesisInput,
        result: ProcessingResult,
    },
}

pub struct Workflow<E> {
    config: Config,
    base: PathBuf,
    paths: FrameworkPaths,
    catalog: Catalog,
    engine: E,
}

impl<E: ProcessingEngine> Workflow<E> {
    /// `base` is the project directory: collection roots resolve against it
    /// and the framework directory lives inside it.
    pub fn new(config: Config, base: impl Into<PathBuf>, engine: E) -> Self {
        let base = base.into();
        let paths = FrameworkPaths::new(config.framework_dir(&base));
        let catalog = Catalog::new(&paths.data);
        Self {
            config,
            base,
            paths,
            catalog,
            engine,
        }
    }

    pub fn paths(&self) -> &FrameworkPaths {
        &self.paths
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.paths.root.is_dir() {
            return Err(WorkflowError::NotInitialized.into());
        }
        Ok(())
    }

    async fn ensure_engine(&self) -> Result<()> {
        if !self.engine.is_available().await {
            return Err(WorkflowError::EngineUnavailable(self.engine.name().to_string()).into());
        }
        Ok(())
    }

    fn load_populated(&self) -> Result<CatalogSnapshot> {
        let snapshot = self.catalog.load()?;
        if !snapshot.is_populated() {
            return Err(WorkflowError::NotPopulated.into());
        }
        Ok(snapshot)
    }

    /// Collect, filter and annotate items, then replace the catalog.
    ///
    /// Re-running resets every status; the key set is stable for an
    /// unchanged tree.
    pub fn populate(&self, roots: &[String]) -> Result<PopulateSummary> {
        println!("=== Stage 1: Populate ===");
        connector_fs::resolve_roots(&self.base, roots)?;
        self.paths.create_all()?;

        let strategy = self.config.populate.collection_strategy;
        tracing::info!(strategy = %strategy, roots = ?roots, "collecting items");
        let collected = match strategy {
            CollectionStrategy::Filesystem => {
                connector_fs::scan_filesystem(&self.base, roots, &self.paths.root)?
            }
            CollectionStrategy::Git => connector_git::scan_git(&self.base, roots, &self.paths.root)?,
        };
        let collected_count = collected.len();

        let filter = ItemFilter::new(&self.config.populate.item_filters)?;
        let kept = apply_filters(collected, &filter);
        let items = extract_metadata(kept, &self.config.populate.metadata_extraction);
        tracing::info!(
            collected = collected_count,
            kept = items.len(),
            "filtered items"
        );

        let snapshot =
            CatalogSnapshot::from_items(self.config.project.clone(), strategy, items);
        self.catalog.save(&snapshot)?;

        let kept = snapshot.items.len();
        println!("✓ Populated {} items", kept);
        println!("  catalog: {}", self.catalog.path().display());

        Ok(PopulateSummary {
            collected: collected_count,
            kept,
            catalog_path: self.catalog.path().to_path_buf(),
        })
    }

    /// Process the next pending item.
    pub async fn map_next(&self) -> Result<MapOutcome> {
        self.ensure_initialized()?;
        self.ensure_engine().await?;

        let mut snapshot = self.load_populated()?;
        let Some((key, _)) = catalog::next_pending(&snapshot) else {
            println!("All items processed!");
            return Ok(MapOutcome::AllDone);
        };

        println!("=== Stage 2: Map - Processing {} ===", key);

        // Durable before the long external call.
        catalog::mark_in_progress(&mut snapshot, &key)?;
        self.catalog.save(&snapshot)?;
        let item = &snapshot.items[&key];

        let output_file = write_result_skeleton(&self.paths.results, item)?;
        let prompt = self.render_item_prompt(item, &output_file)?;
        let log_file = timestamped_path(&self.paths.logs, "map", "log");

        let result = self.engine.run_item(&prompt, &log_file).await;
        if !result.success {
            return Err(WorkflowError::ProcessingFailed {
                key,
                message: result.error_text().to_string(),
                log: log_file,
            }
            .into());
        }

        let mut snapshot = self.catalog.load()?;
        catalog::mark_completed(&mut snapshot, &key, Utc::now())?;
        self.catalog.save(&snapshot)?;

        let tally = catalog::tally(&snapshot);
        print!("{}", progress::render_processing_summary(&key, &result, &tally));

        Ok(MapOutcome::Processed { key, result })
    }

    /// Run `map_next` until nothing is pending, pausing `delay` between
    /// items. Stops at the first failure. Returns the number processed.
    pub async fn map_all(&self, delay: Duration) -> Result<usize> {
        self.ensure_initialized()?;

        let mut processed = 0;
        loop {
            let remaining = catalog::tally(&self.load_populated()?).remaining();
            if remaining == 0 {
                break;
            }

            match self.map_next().await? {
                MapOutcome::Processed { .. } => processed += 1,
                MapOutcome::AllDone => break,
            }

            if remaining > 1 && !delay.is_zero() {
                tracing::debug!("waiting {:?} before the next item", delay);
                tokio::time::sleep(delay).await;
            }
        }

        println!("✓ Processed {} items", processed);
        Ok(processed)
    }

    pub fn status(&self) -> Result<Tally> {
        self.ensure_initialized()?;
        let snapshot = self.load_populated()?;
        let tally = catalog::tally(&snapshot);
        print!("{}", progress::render_status(&tally));
        Ok(tally)
    }

    /// Synthesize the filtered results into one timestamped report.
    pub async fn reduce(&self, tier: SeverityTier, category: &str) -> Result<ReduceOutcome> {
        self.ensure_initialized()?;
        self.ensure_engine().await?;

        let results = collect_results(&self.paths.results);
        if results.is_empty() {
            println!("No results found to synthesize");
            return Ok(ReduceOutcome::NoResults);
        }

        let filtered = filter_results(results, tier, category);
        if filtered.is_empty() {
            println!("No {} {} results found", tier, category);
            return Ok(ReduceOutcome::NothingMatched);
        }

        println!(
            "=== Stage 3: Reduce - Synthesizing {} results ===",
            filtered.len()
        );

        let input = prepare_synthesis_input(
            &filtered,
            tier,
            category,
            &self.config.reduce.output_sections,
        );
        let vars = input.to_vars();
        let missing = unresolved_variables(&self.config.reduce.synthesis_template, &vars);
        if !missing.is_empty() {
            tracing::debug!(?missing, "synthesis template has unresolved placeholders");
        }
        let prompt = render_template(&self.config.reduce.synthesis_template, &vars);
        let log_file = timestamped_path(&self.paths.logs, "reduce", "log");

        let result = self.engine.run_synthesis(&prompt, &log_file).await;
        if !result.success {
            return Err(WorkflowError::SynthesisFailed {
                message: result.error_text().to_string(),
                log: log_file,
            }
            .into());
        }

        let path = timestamped_path(
            &self.paths.synthesis,
            &format!("synthesis_{}_{}", tier, file_safe(category)),
            "md",
        );
        let report = format!(
            "# Synthesis Report ({} {})\n\nGenerated: {}\n\n{}",
            title_case(tier.as_str()),
            title_case(category),
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            result.output_data.as_deref().unwrap_or_default()
        );
        std::fs::write(&path, report)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        println!("✓ Synthesis complete: {}", path.display());
        print!(
            "{}",
            progress::render_synthesis_summary(filtered.len(), &result)
        );

        Ok(ReduceOutcome::Synthesized {
            path,
            input,
            result,
        })
    }

    /// Render the processing template for one item.
    pub fn render_item_prompt(&self, item: &ItemRecord, output_file: &Path) -> Result<String> {
        let map = &self.config.map;
        let global_context = load_global_context(&self.config, &self.paths.root)?;

        let mut vars = TemplateVars::new();
        vars.insert("item_path".to_string(), item.path.clone());
        vars.insert("item_data".to_string(), serde_json::to_string_pretty(item)?);
        vars.insert(
            "output_file".to_string(),
            output_file.to_string_lossy().to_string(),
        );
        vars.insert("global_context".to_string(), global_context);
        vars.insert(
            "context_file".to_string(),
            map.global_context
                .as_ref()
                .map(|gc| gc.context_file.clone())
                .unwrap_or_default(),
        );
        vars.insert(
            "assessment_instructions".to_string(),
            assessment_instructions(&self.config)?,
        );
        vars.insert(
            "output_requirements".to_string(),
            output_requirements(&self.config)?,
        );

        let missing = unresolved_variables(&map.processing_template, &vars);
        if !missing.is_empty() {
            tracing::debug!(?missing, "processing template has unresolved placeholders");
        }

        let mut prompt = render_template(&map.processing_template, &vars);
        if let Some(gc) = &map.global_context {
            prompt.push_str(&format!(
                "\n\n## Global Context Update Instructions\nAfter you have completed your review, update the global context file with your findings. {}",
                gc.context_update_rules
            ));
        }
        Ok(prompt)
    }
}

fn assessment_instructions(config: &Config) -> Result<String> {
    let mut blocks = Vec::new();
    for dimension in &config.map.assessment_dimensions {
        blocks.push(format!(
            "\nFor **{}** ({}):\n{}\n\nScoring rubric:\n{}\n",
            title_case(&dimension.name),
            dimension.description,
            dimension.specific_instructions,
            serde_json::to_string_pretty(&dimension.scoring_rubric)?
        ));
    }
    Ok(blocks.join("\n"))
}

fn output_requirements(config: &Config) -> Result<String> {
    let schema = config.map.output_schema.clone().unwrap_or_default();
    Ok(format!(
        "\nOutput Format: xml\nRequired Structure: {}\n\nPlease ensure your output follows this structure exactly.\n",
        serde_json::to_string_pretty(&schema)?
    ))
}

/// `<dir>/<prefix>_<YYYYmmdd_HHMMSS>.<ext>`, with a counter appended when
/// two runs land in the same second.
fn timestamped_path(dir: &Path, prefix: &str, ext: &str) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.{}", prefix, stamp, ext));
    if !path.exists() {
        return path;
    }
    (2..)
        .map(|n| dir.join(format!("{}_{}_{}.{}", prefix, stamp, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
