//! # MapReduce Harness
//!
//! A configuration-driven, resumable review pipeline. Files are collected
//! into a durable catalog, each one is handed to an external AI command-line
//! program, and the structured results are filtered and synthesized into a
//! single report.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Collectors  │──▶│   Catalog   │──▶│  Map (item)  │──▶ results/*.xml
//! │  FS / Git   │   │ master.json │   │ Claude CLI   │
//! └─────────────┘   └─────────────┘   └──────────────┘
//!                                             │
//!                        ┌────────────────────┘
//!                        ▼
//!                 ┌──────────────┐   ┌──────────────────┐
//!                 │  Aggregate   │──▶│ Reduce (synth.)  │──▶ synthesis/*.md
//!                 │ filter/flat  │   │   Claude CLI     │
//!                 └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mrh populate src          # catalog matching files under src/
//! mrh status                # counts and progress bar
//! mrh map-next              # review one item
//! mrh map-all --delay 2     # review the rest
//! mrh reduce --severity high --category security
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`catalog`] | Durable item → status mapping |
//! | [`connector_fs`] | Filesystem collection |
//! | [`connector_git`] | Git collection with filesystem fallback |
//! | [`filter`] | Include/exclude/size filtering |
//! | [`extract`] | Metadata extraction rules |
//! | [`template`] | `{name}` prompt rendering |
//! | [`context`] | Global context document |
//! | [`engine`] | Processing engine trait and Claude CLI adapter |
//! | [`stream`] | `stream-json` decoding and token accounting |
//! | [`results`] | Result artifact skeletons and XML decoding |
//! | [`aggregate`] | Severity/category filtering and synthesis input |
//! | [`progress`] | Human-readable reports |
//! | [`workflow`] | Populate, map, status and reduce |

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod connector_fs;
pub mod connector_git;
pub mod context;
pub mod engine;
pub mod extract;
pub mod filter;
pub mod models;
pub mod progress;
pub mod results;
pub mod stream;
pub mod template;
pub mod workflow;
