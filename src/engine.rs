//! Processing engines: the external backend behind `map` and `reduce`.
//!
//! The workflow only ever talks to a [`ProcessingEngine`], so tests (and
//! other backends) can stand in for the real CLI. [`ClaudeEngine`] drives the
//! Claude command-line program:
//!
//! ```text
//! claude --print <prompt> --output-format stream-json \
//!        --permission-mode acceptEdits --verbose
//! ```
//!
//! Its stdout and stderr are read line by line while the process runs, every
//! raw line is appended to a per-invocation log file, and each line is fed to
//! a [`StreamAccumulator`]. An engine never returns an error: spawn, I/O and
//! timeout failures all come back as a failed [`ProcessingResult`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::ExecutionConfig;
use crate::models::{ProcessingResult, RunMode};
use crate::stream::StreamAccumulator;

/// A backend that can analyse one item or synthesize many results.
#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    /// Short identifier used in log lines (e.g. `"claude"`).
    fn name(&self) -> &str;

    /// Quick presence check; the workflow refuses to start without it.
    async fn is_available(&self) -> bool;

    /// Run one prompt to completion, logging raw output to `log_file`.
    async fn run(&self, prompt: &str, log_file: &Path, mode: RunMode) -> ProcessingResult;

    async fn run_item(&self, prompt: &str, log_file: &Path) -> ProcessingResult {
        self.run(prompt, log_file, RunMode::Item).await
    }

    async fn run_synthesis(&self, prompt: &str, log_file: &Path) -> ProcessingResult {
        self.run(prompt, log_file, RunMode::Synthesis).await
    }
}

/// The Claude CLI, spoken to over `stream-json`.
#[derive(Debug, Clone)]
pub struct ClaudeEngine {
    program: String,
    leading_args: Vec<String>,
    extra_args: Vec<String>,
    timeout: Option<Duration>,
}

impl ClaudeEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &ExecutionConfig) -> Self {
        let mut command = config.command.iter();
        let program = command.next().cloned().unwrap_or_else(|| "claude".to_string());
        Self {
            program,
            leading_args: command.cloned().collect(),
            extra_args: config.extra_args.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args);
        cmd
    }

    async fn execute(
        &self,
        prompt: &str,
        log_file: &Path,
        mode: RunMode,
        start: Instant,
    ) -> Result<ProcessingResult> {
        if let Some(parent) = log_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut log = tokio::fs::File::create(log_file)
            .await
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

        let mut cmd = self.command();
        cmd.arg("--print")
            .arg(prompt)
            .args(["--output-format", "stream-json"])
            .args(["--permission-mode", "acceptEdits"])
            .arg("--verbose")
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!("'{}' not found on PATH", self.program)
            } else {
                anyhow::anyhow!("failed to spawn '{}': {}", self.program, e)
            }
        })?;

        let (tx, mut rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut acc = StreamAccumulator::new();
        let pump = async {
            while let Some(line) = rx.recv().await {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
                for fragment in acc.ingest(&line) {
                    if mode == RunMode::Item {
                        println!("{}\n---", fragment);
                    }
                }
            }
            log.flush().await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(status)
        };

        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, pump).await.ok(),
            None => Some(pump.await),
        };
        let Some(status) = outcome else {
            let _ = child.start_kill();
            let limit = self.timeout.unwrap_or_default();
            return Ok(partial_failure(
                acc,
                format!("{} timed out after {}s", self.name(), limit.as_secs()),
                start.elapsed(),
            ));
        };
        let status = status?;

        let duration = start.elapsed();
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Ok(partial_failure(
                acc,
                format!("{} CLI failed with return code {}", self.name(), code),
                duration,
            ));
        }

        let (input, output, cost) = (acc.input_tokens(), acc.output_tokens(), acc.cost_usd());
        Ok(ProcessingResult::succeeded(acc.into_fragments(), duration).with_usage(input, output, cost))
    }
}

/// A failed result that still reports whatever text and usage arrived.
fn partial_failure(acc: StreamAccumulator, message: String, duration: Duration) -> ProcessingResult {
    let (input, output, cost) = (acc.input_tokens(), acc.output_tokens(), acc.cost_usd());
    let mut result = ProcessingResult::failed(message, duration).with_usage(input, output, cost);
    result.output_lines = acc.into_fragments();
    result
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("error reading backend output: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ProcessingEngine for ClaudeEngine {
    fn name(&self) -> &str {
        "claude"
    }

    async fn is_available(&self) -> bool {
        let mut cmd = self.command();
        cmd.arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match cmd.status().await {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::debug!("{} availability check failed: {}", self.program, e);
                false
            }
        }
    }

    async fn run(&self, prompt: &str, log_file: &Path, mode: RunMode) -> ProcessingResult {
        let start = Instant::now();
        tracing::info!(mode = ?mode, log = %log_file.display(), "invoking {}", self.name());
        match self.execute(prompt, log_file, mode, start).await {
            Ok(result) => result,
            Err(e) => ProcessingResult::failed(
                format!("Failed to execute {} CLI: {:#}", self.name(), e),
                start.elapsed(),
            ),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A fake backend: a shell script run through `sh`, so no exec bit is needed.
    fn script_engine(tmp: &TempDir, body: &str) -> ClaudeEngine {
        let script = tmp.path().join("backend.sh");
        std::fs::write(&script, body).unwrap();
        ClaudeEngine::from_config(&ExecutionConfig {
            command: vec!["sh".to_string(), script.to_string_lossy().to_string()],
            ..ExecutionConfig::default()
        })
    }

    const SUCCESS: &str = r#"
if [ "$1" = "--version" ]; then echo "fake 1.0"; exit 0; fi
echo 'booting...'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Looked at the file"}],"usage":{"input_tokens":1000,"output_tokens":500}}}'
echo 'stderr noise' 1>&2
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Wrote findings"}]}}'
exit 0
"#;

    #[tokio::test]
    async fn streams_events_and_logs_raw_lines() {
        let tmp = TempDir::new().unwrap();
        let engine = script_engine(&tmp, SUCCESS);
        assert!(engine.is_available().await);

        let log = tmp.path().join("logs/map.log");
        let result = engine.run_synthesis("prompt text", &log).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(
            result.output_data.as_deref(),
            Some("Looked at the file\nWrote findings")
        );
        assert_eq!(result.input_tokens, 1000);
        assert_eq!(result.output_tokens, 500);
        assert_eq!(result.total_tokens, 1500);
        assert!((result.cost_usd - 0.0105).abs() < 1e-12);

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.contains("booting..."));
        assert!(logged.contains("stderr noise"));
        assert!(logged.contains("Wrote findings"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_result() {
        let tmp = TempDir::new().unwrap();
        let engine = script_engine(&tmp, "echo 'partial'\nexit 3\n");
        let result = engine
            .run_synthesis("p", &tmp.path().join("fail.log"))
            .await;
        assert!(!result.success);
        assert!(result.output_data.is_none());
        assert!(result.error_text().contains("return code 3"));
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_result() {
        let tmp = TempDir::new().unwrap();
        let engine = ClaudeEngine::new("definitely-not-a-real-backend-binary");
        assert!(!engine.is_available().await);
        let result = engine.run_item("p", &tmp.path().join("x.log")).await;
        assert!(!result.success);
        assert!(result.error_text().contains("Failed to execute"));
    }

    #[tokio::test]
    async fn timeout_kills_a_hung_backend() {
        let tmp = TempDir::new().unwrap();
        let engine =
            script_engine(&tmp, "echo 'started'\nsleep 30\n").with_timeout(Duration::from_secs(1));
        let started = Instant::now();
        let result = engine.run_synthesis("p", &tmp.path().join("t.log")).await;
        assert!(!result.success);
        assert!(result.error_text().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
