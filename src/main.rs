//! # MapReduce Harness CLI (`mrh`)
//!
//! Drives a resumable populate → map → reduce review of a project tree. Run it
//! from the project directory; state lives in `./<project>-framework/`.
//!
//! ## Usage
//!
//! ```bash
//! mrh --config ./mapreduce.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mrh populate [ROOTS...]` | Collect and filter items, (re)writing the catalog |
//! | `mrh status` | Show per-status counts and a progress bar |
//! | `mrh map-next` | Process the next pending item |
//! | `mrh map-all [--delay N]` | Process every pending item, stopping on failure |
//! | `mrh reduce [--severity S] [--category C]` | Synthesize filtered findings into one report |
//!
//! ## Examples
//!
//! ```bash
//! # Catalog every matching file under src/ and lib/
//! mrh populate src lib
//!
//! # Work through the catalog two seconds apart
//! mrh map-all --delay 2
//!
//! # Summarise high and critical security findings
//! mrh reduce --severity high --category security
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mapreduce_harness::aggregate::SeverityTier;
use mapreduce_harness::config::{load_config, EngineKind};
use mapreduce_harness::engine::ClaudeEngine;
use mapreduce_harness::workflow::Workflow;

/// MapReduce Harness: a resumable populate/map/reduce workflow for
/// AI-assisted code review.
#[derive(Parser)]
#[command(
    name = "mrh",
    about = "MapReduce Harness: resumable populate/map/reduce review driven by an AI CLI",
    version
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./mapreduce.toml")]
    config: PathBuf,

    /// Enable debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect items and write a fresh catalog.
    ///
    /// Resets every item to `not_reviewed`. With no roots, the whole project
    /// directory is scanned.
    Populate {
        /// Directories to scan, relative to the project directory.
        roots: Vec<String>,
    },

    /// Show processing progress.
    Status,

    /// Process the next pending item.
    ///
    /// Items left `in_progress` by an interrupted or failed run are picked up
    /// again in catalog order.
    MapNext,

    /// Process all pending items.
    MapAll {
        /// Seconds to wait between items. Defaults to `execution.delay_secs`.
        #[arg(long)]
        delay: Option<u64>,
    },

    /// Synthesize results into a report.
    Reduce {
        /// Minimum severity: `high` (high, critical), `medium` (adds medium)
        /// or `low` (adds low).
        #[arg(long, value_enum, default_value_t = SeverityTier::Medium)]
        severity: SeverityTier,

        /// Finding category to keep, or `all`.
        #[arg(long, default_value = "all")]
        category: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    let cfg = load_config(&cli.config)?;
    let base = std::env::current_dir()?;
    let engine = match cfg.execution.engine {
        EngineKind::Claude => ClaudeEngine::from_config(&cfg.execution),
    };
    let default_delay = cfg.execution.delay_secs;
    let workflow = Workflow::new(cfg, base, engine);

    match cli.command {
        Commands::Populate { roots } => {
            workflow.populate(&roots)?;
        }
        Commands::Status => {
            workflow.status()?;
        }
        Commands::MapNext => {
            workflow.map_next().await?;
        }
        Commands::MapAll { delay } => {
            let delay = Duration::from_secs(delay.unwrap_or(default_delay));
            workflow.map_all(delay).await?;
        }
        Commands::Reduce { severity, category } => {
            workflow.reduce(severity, &category).await?;
        }
    }

    Ok(())
}
