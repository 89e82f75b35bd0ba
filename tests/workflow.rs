//! End-to-end workflow tests against an in-process stub engine.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mapreduce_harness::aggregate::SeverityTier;
use mapreduce_harness::config::parse_config;
use mapreduce_harness::engine::ProcessingEngine;
use mapreduce_harness::models::{ItemStatus, ProcessingResult, RunMode};
use mapreduce_harness::workflow::{MapOutcome, ReduceOutcome, Workflow, WorkflowError};

const CONFIG: &str = r#"
[project]
name = "demo"
version = "1.0"
description = "Workflow test"

[populate]
collection_strategy = "filesystem"

[populate.item_filters]
include_patterns = ["*.py"]

[populate.metadata_extraction]
required_fields = ["language"]

[populate.metadata_extraction.fields.language]
kind = "extension_title"

[map]
processing_template = "ITEM={item_path}\nOUTPUT={output_file}\nDATA={item_data}"
assessment_dimensions = []

[reduce]
synthesis_template = "Issues: {issue_count} in {file_count} files\n{issues_data}"
aggregation_rules = {}
"#;

#[derive(Default)]
struct StubState {
    /// Item path → severity of the single finding the stub reports.
    findings: BTreeMap<String, String>,
    fail_on: Mutex<Option<String>>,
    fail_all: AtomicBool,
    calls: Mutex<Vec<(RunMode, String)>>,
}

/// Always-available engine that writes a result artifact for each item.
#[derive(Clone)]
struct StubEngine(Arc<StubState>);

fn prompt_value<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
}

#[async_trait]
impl ProcessingEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn run(&self, prompt: &str, log_file: &Path, mode: RunMode) -> ProcessingResult {
        let state = &self.0;
        state.calls.lock().unwrap().push((mode, prompt.to_string()));
        fs::write(log_file, prompt).unwrap();

        if mode == RunMode::Synthesis {
            return ProcessingResult::succeeded(vec![prompt.to_string()], Duration::from_millis(5))
                .with_usage(2000, 1000, 0.021);
        }

        let item = prompt_value(prompt, "ITEM").unwrap_or_default().to_string();
        let failing = state.fail_all.load(Ordering::SeqCst)
            || state.fail_on.lock().unwrap().as_deref() == Some(item.as_str());
        if failing {
            return ProcessingResult::failed("stub backend exited with 1", Duration::ZERO);
        }

        if let (Some(severity), Some(output)) =
            (state.findings.get(&item), prompt_value(prompt, "OUTPUT"))
        {
            let xml = format!(
                "<analysis><metadata><source_file>{item}</source_file></metadata>\
                 <scores><quality>5</quality></scores>\
                 <findings><issues><issue><severity>{severity}</severity>\
                 <category>security</category><description>{item} problem</description>\
                 </issue></issues></findings></analysis>"
            );
            fs::write(output, xml).unwrap();
        }

        ProcessingResult::succeeded(vec!["reviewed".to_string()], Duration::from_millis(5))
            .with_usage(1000, 500, 0.0105)
    }
}

fn project(files: &[&str]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for file in files {
        let path = tmp.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!("# {}\nprint('hi')\n", file)).unwrap();
    }
    tmp
}

fn workflow(tmp: &TempDir, state: StubState) -> (Workflow<StubEngine>, Arc<StubState>) {
    let state = Arc::new(state);
    let config = parse_config(CONFIG).unwrap();
    (
        Workflow::new(config, tmp.path(), StubEngine(state.clone())),
        state,
    )
}

fn statuses(wf: &Workflow<StubEngine>) -> Vec<(String, ItemStatus)> {
    wf.catalog()
        .load()
        .unwrap()
        .items
        .into_iter()
        .map(|(k, v)| (k, v.status))
        .collect()
}

#[tokio::test]
async fn test_end_to_end_two_items() {
    let tmp = project(&["src/a.py", "src/b.py", "README.md"]);
    let mut findings = BTreeMap::new();
    findings.insert("src/a.py".to_string(), "high".to_string());
    findings.insert("src/b.py".to_string(), "low".to_string());
    let (wf, state) = workflow(
        &tmp,
        StubState {
            findings,
            ..StubState::default()
        },
    );

    let summary = wf.populate(&[]).unwrap();
    assert_eq!(summary.kept, 2);
    assert_eq!(
        statuses(&wf),
        vec![
            ("src/a.py".to_string(), ItemStatus::NotReviewed),
            ("src/b.py".to_string(), ItemStatus::NotReviewed),
        ]
    );

    match wf.map_next().await.unwrap() {
        MapOutcome::Processed { key, result } => {
            assert_eq!(key, "src/a.py");
            assert_eq!(result.total_tokens, 1500);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        statuses(&wf),
        vec![
            ("src/a.py".to_string(), ItemStatus::Completed),
            ("src/b.py".to_string(), ItemStatus::NotReviewed),
        ]
    );

    wf.map_next().await.unwrap();
    let tally = wf.status().unwrap();
    assert_eq!(tally.completed, 2);
    assert_eq!(tally.total(), 2);
    assert_eq!(tally.remaining(), 0);

    let snapshot = wf.catalog().load().unwrap();
    assert!(snapshot.items.values().all(|i| i.processed_at.is_some()));
    assert_eq!(snapshot.items["src/a.py"].fields["language"], "Py");

    assert_eq!(wf.map_next().await.unwrap(), MapOutcome::AllDone);

    let ReduceOutcome::Synthesized { path, input, .. } =
        wf.reduce(SeverityTier::Medium, "all").await.unwrap()
    else {
        panic!("expected a synthesis");
    };
    assert_eq!(input.issue_count, 1);
    assert_eq!(input.file_count, 1);
    assert!(input.issues_data.contains("src/a.py problem"));
    assert!(!input.issues_data.contains("src/b.py problem"));

    let report = fs::read_to_string(&path).unwrap();
    assert!(report.starts_with("# Synthesis Report (Medium All)\n\nGenerated: "));
    assert!(report.contains("Issues: 1 in 1 files"));
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("synthesis_medium_all_"), "{}", name);
    assert!(name.ends_with(".md"));

    let calls = state.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].1.contains("\"status\": \"in_progress\""), "{}", calls[0].1);
    assert!(!calls[0].1.contains("not_reviewed"));
    assert_eq!(calls[2].0, RunMode::Synthesis);
}

#[tokio::test]
async fn test_failed_item_stays_in_progress_and_is_retried() {
    let tmp = project(&["src/a.py", "src/b.py"]);
    let (wf, state) = workflow(&tmp, StubState::default());
    wf.populate(&[]).unwrap();

    state.fail_all.store(true, Ordering::SeqCst);
    let err = wf.map_next().await.unwrap_err();
    match err.downcast_ref::<WorkflowError>() {
        Some(WorkflowError::ProcessingFailed { key, message, log }) => {
            assert_eq!(key, "src/a.py");
            assert!(message.contains("exited with 1"));
            assert!(log.starts_with(wf.paths().logs.as_path()));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(statuses(&wf)[0].1, ItemStatus::InProgress);

    // The skeleton was written before the call.
    let skeleton = fs::read_to_string(wf.paths().results.join("src/a.xml")).unwrap();
    assert!(skeleton.contains("<status>in_progress</status>"));

    state.fail_all.store(false, Ordering::SeqCst);
    match wf.map_next().await.unwrap() {
        MapOutcome::Processed { key, .. } => assert_eq!(key, "src/a.py"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(statuses(&wf)[0].1, ItemStatus::Completed);
    assert_eq!(statuses(&wf)[1].1, ItemStatus::NotReviewed);
}

#[tokio::test]
async fn test_map_all_processes_everything() {
    let tmp = project(&["a.py", "b.py", "c.py"]);
    let (wf, state) = workflow(&tmp, StubState::default());
    wf.populate(&[]).unwrap();

    let processed = wf.map_all(Duration::ZERO).await.unwrap();
    assert_eq!(processed, 3);
    assert!(statuses(&wf)
        .iter()
        .all(|(_, s)| *s == ItemStatus::Completed));
    assert_eq!(state.calls.lock().unwrap().len(), 3);

    assert_eq!(wf.map_all(Duration::ZERO).await.unwrap(), 0);
}

#[tokio::test]
async fn test_map_all_stops_at_first_failure() {
    let tmp = project(&["a.py", "b.py", "c.py"]);
    let (wf, state) = workflow(&tmp, StubState::default());
    *state.fail_on.lock().unwrap() = Some("b.py".to_string());
    wf.populate(&[]).unwrap();

    assert!(wf.map_all(Duration::ZERO).await.is_err());
    assert_eq!(
        statuses(&wf),
        vec![
            ("a.py".to_string(), ItemStatus::Completed),
            ("b.py".to_string(), ItemStatus::InProgress),
            ("c.py".to_string(), ItemStatus::NotReviewed),
        ]
    );
}

#[tokio::test]
async fn test_repopulate_keeps_keys_and_resets_status() {
    let tmp = project(&["src/a.py", "src/b.py", "vendor/c.py"]);
    let (wf, _state) = workflow(&tmp, StubState::default());

    wf.populate(&["src".to_string()]).unwrap();
    let first: Vec<String> = statuses(&wf).into_iter().map(|(k, _)| k).collect();
    assert_eq!(first, vec!["src/a.py", "src/b.py"]);

    wf.map_next().await.unwrap();
    wf.populate(&["src".to_string()]).unwrap();
    let second = statuses(&wf);
    assert_eq!(
        second.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(),
        first
    );
    assert!(second.iter().all(|(_, s)| *s == ItemStatus::NotReviewed));
}

#[tokio::test]
async fn test_reduce_without_results_or_matches() {
    let tmp = project(&["a.py"]);
    let (wf, state) = workflow(&tmp, StubState::default());
    wf.populate(&[]).unwrap();

    assert_eq!(
        wf.reduce(SeverityTier::Medium, "all").await.unwrap(),
        ReduceOutcome::NoResults
    );

    let xml = "<analysis><findings><issues><issue><severity>low</severity>\
               <category>style</category></issue></issues></findings></analysis>";
    fs::write(wf.paths().results.join("a.xml"), xml).unwrap();
    assert_eq!(
        wf.reduce(SeverityTier::High, "all").await.unwrap(),
        ReduceOutcome::NothingMatched
    );
    assert_eq!(
        wf.reduce(SeverityTier::Low, "security").await.unwrap(),
        ReduceOutcome::NothingMatched
    );
    assert!(state.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_root_outside_project_is_rejected_before_any_write() {
    let tmp = project(&["src/a.py"]);
    let outside = project(&["app.py"]);
    fs::write(outside.path().join("app.xml"), "<user-owned-config/>").unwrap();
    let (wf, state) = workflow(&tmp, StubState::default());

    let root = outside.path().to_string_lossy().to_string();
    let err = wf.populate(&[root]).unwrap_err();
    assert!(
        format!("{:#}", err).contains("outside the project directory"),
        "{:#}",
        err
    );
    assert!(!wf.paths().root.exists());

    let err = wf.map_next().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<WorkflowError>(),
        Some(WorkflowError::NotInitialized)
    ));
    assert_eq!(
        fs::read_to_string(outside.path().join("app.xml")).unwrap(),
        "<user-owned-config/>"
    );
    assert!(state.calls.lock().unwrap().is_empty());
}
