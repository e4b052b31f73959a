//! Launches one Karate run as a child process and reduces its output.
//!
//! stdout and stderr are read by two forwarding tasks that share one
//! channel; the launcher is the only consumer and owns the reducer, so
//! chunks are classified in arrival order and the verdict is computed only
//! after both pipes closed.

use crate::artifact::DownloadError;
use crate::java::LocatorError;
use crate::session::RunSession;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use karate_core::summary::{self, ReportDir, REPORTS_PREFIX, SUMMARY_HTML};
use karate_core::{
    Config, HistoryStore, OutputEvent, OutputReducer, OutputSink, ReducerOptions, RunRecord,
    RunRequest, RunSummary, Verdict,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to keep draining output after the child was killed.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read size for the forwarding tasks.
const CHUNK_SIZE: usize = 8192;

/// Logback config picked up automatically when present in the workspace.
const WORKSPACE_LOGBACK: &str = "src/logback.xml";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    RuntimeNotFound(#[from] LocatorError),
    #[error("failed to obtain Karate: {0}")]
    DownloadFailed(#[from] DownloadError),
    #[error("a test run is already in progress")]
    AlreadyRunning,
    #[error("workspace not found: {}", .0.display())]
    NoWorkspace(PathBuf),
    #[error("failed to start {}: {source}", program.display())]
    ProcessSpawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LaunchError>;

/// Result of one completed (or cancelled) run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub verdict: Verdict,
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub summary: Option<RunSummary>,
    pub record: RunRecord,
    pub duration_ms: u64,
    pub cancelled: bool,
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs feature files for one workspace, one at a time.
#[derive(Debug)]
pub struct Launcher {
    workspace_root: PathBuf,
    session: RunSession,
    history: Option<HistoryStore>,
    running: AtomicBool,
}

impl Launcher {
    /// Create a launcher. Relative config paths are anchored at the workspace.
    pub fn new(workspace_root: impl Into<PathBuf>, mut config: Config) -> Self {
        let workspace_root = workspace_root.into();
        config.resolve_paths(&workspace_root);
        Self {
            workspace_root,
            session: RunSession::new(config),
            history: None,
            running: AtomicBool::new(false),
        }
    }

    /// Record every completed run in `history`.
    #[must_use]
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &Config {
        self.session.config()
    }

    pub fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run `request` to completion.
    pub async fn run<S>(&self, request: RunRequest, sink: &mut S) -> Result<RunOutcome>
    where
        S: OutputSink + Send + ?Sized,
    {
        self.run_until(request, sink, CancellationToken::new()).await
    }

    /// Run `request`, killing the child if `cancel` fires.
    pub async fn run_until<S>(
        &self,
        request: RunRequest,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<RunOutcome>
    where
        S: OutputSink + Send + ?Sized,
    {
        let Some(_guard) = RunningGuard::acquire(&self.running) else {
            return Err(LaunchError::AlreadyRunning);
        };

        if !self.workspace_root.is_dir() {
            return Err(LaunchError::NoWorkspace(self.workspace_root.clone()));
        }

        let java = self.session.runtime().await?.to_path_buf();
        let jar = self.session.artifact().await?.path.clone();
        let args = self.command_args(&jar, &request);

        sink.clear();
        sink.emit(OutputEvent::Banner(header(&request)));
        sink.emit(OutputEvent::Banner(command_line(&java, &args)));

        info!(
            target_file = %request.target.display(),
            scenario = request.scenario.as_deref().unwrap_or(""),
            workspace = %self.workspace_root.display(),
            "starting Karate run"
        );

        let started_at = Utc::now();
        let started = Instant::now();

        let mut child = Command::new(&java)
            .args(&args)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::ProcessSpawn {
                program: java.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward(stdout, tx.clone(), Chunk::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(stderr, tx.clone(), Chunk::Stderr));
        }
        drop(tx);

        let config = self.session.config();
        let mut reducer = OutputReducer::new(ReducerOptions {
            mode: config.output_mode,
            stderr_policy: config.stderr_policy,
        });

        let mut drain_deadline = None;
        loop {
            let chunk = match drain_deadline {
                Some(deadline) => {
                    if let Ok(chunk) = timeout_at(deadline, rx.recv()).await {
                        chunk
                    } else {
                        warn!("output capture timed out after cancellation");
                        break;
                    }
                }
                None => tokio::select! {
                    chunk = rx.recv() => chunk,
                    () = cancel.cancelled() => {
                        info!(target_file = %request.target.display(), "cancellation requested; killing runner");
                        if let Err(err) = child.kill().await {
                            warn!(error = %err, "failed to kill cancelled runner");
                        }
                        drain_deadline = Some(tokio::time::Instant::now() + IO_CAPTURE_TIMEOUT);
                        continue;
                    }
                },
            };

            match chunk {
                Some(Chunk::Stdout(bytes)) => reducer.push_stdout(&bytes, sink),
                Some(Chunk::Stderr(bytes)) => reducer.push_stderr(&bytes, sink),
                None => break,
            }
        }

        let cancelled = drain_deadline.is_some();
        let status = child.wait().await?;
        let exit_code = if cancelled { None } else { status.code() };
        let duration_ms = started.elapsed().as_millis() as u64;

        let reduction = reducer.finish(exit_code, sink);
        info!(
            target_file = %request.target.display(),
            verdict = %reduction.verdict,
            exit_code = ?exit_code,
            duration_ms,
            "Karate run finished"
        );

        let record = self.build_record(&request, reduction.verdict, reduction.summary, started_at, duration_ms);
        if let Some(history) = &self.history {
            if let Err(err) = history.record(record.clone()) {
                warn!(error = %err, "failed to record run history");
            }
        }

        Ok(RunOutcome {
            verdict: reduction.verdict,
            exit_code,
            summary: reduction.summary,
            record,
            duration_ms,
            cancelled,
        })
    }

    /// Arguments after the java executable.
    fn command_args(&self, jar: &Path, request: &RunRequest) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(logback) = self.logback_config() {
            args.push(format!("-Dlogback.configurationFile={}", logback.display()));
        }
        args.push("-jar".to_string());
        args.push(jar.display().to_string());
        args.push(request.target.display().to_string());
        if let Some(name) = &request.scenario {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        args
    }

    fn logback_config(&self) -> Option<PathBuf> {
        let config = self.session.config();
        if config.output_mode == karate_core::OutputMode::Logback {
            if let Some(file) = &config.logback_file {
                return Some(file.clone());
            }
        }
        let workspace = self.workspace_root.join(WORKSPACE_LOGBACK);
        workspace.is_file().then_some(workspace)
    }

    fn build_record(
        &self,
        request: &RunRequest,
        verdict: Verdict,
        parsed: Option<RunSummary>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> RunRecord {
        let report_dir = self.fresh_report_dir(started_at);
        let report_path = report_dir.as_ref().map_or_else(
            || self.config().report_dir.join(REPORTS_PREFIX).join(SUMMARY_HTML),
            ReportDir::summary_html,
        );

        let record = RunRecord::new(
            request.target.display().to_string(),
            request.scenario.clone(),
            verdict,
            report_path.display().to_string(),
        );

        let from_report = report_dir
            .and_then(|dir| match summary::read_summary(&dir.path) {
                Ok(report) => Some(report),
                Err(err) => {
                    debug!(error = %err, "report summary unavailable");
                    None
                }
            })
            .and_then(|report| report.feature(&request.target).cloned());

        match (from_report, parsed) {
            (Some(feature), _) => record
                .with_duration_ms(feature.duration_ms())
                .with_counts(feature.passed_count, feature.failed_count),
            (None, Some(RunSummary { passed: Some(passed), failed, .. })) => {
                record.with_duration_ms(duration_ms).with_counts(passed, failed)
            }
            (None, Some(RunSummary { scenarios: Some(total), failed, .. })) => record
                .with_duration_ms(duration_ms)
                .with_counts(total.saturating_sub(failed), failed),
            (None, _) => record.with_duration_ms(duration_ms),
        }
    }

    /// Newest report directory written during this run.
    fn fresh_report_dir(&self, started_at: DateTime<Utc>) -> Option<ReportDir> {
        // Report suffixes and mtimes have coarse resolution.
        let cutoff = started_at - ChronoDuration::seconds(1);
        match summary::report_dirs(&self.config().report_dir) {
            Ok(dirs) => {
                let mut fresh: Vec<ReportDir> = dirs
                    .into_iter()
                    .filter(|dir| dir.timestamp.is_some_and(|ts| ts >= cutoff))
                    .collect();
                // Karate moves the previous report aside into a suffixed
                // directory, so the unsuffixed one is the current run.
                let current = fresh
                    .iter()
                    .position(|dir| dir.path.file_name().is_some_and(|n| n == REPORTS_PREFIX));
                match current {
                    Some(index) => Some(fresh.swap_remove(index)),
                    None => fresh.into_iter().next(),
                }
            }
            Err(err) => {
                debug!(error = %err, "failed to list report directories");
                None
            }
        }
    }
}

async fn forward<R>(mut reader: R, tx: mpsc::Sender<Chunk>, wrap: fn(Vec<u8>) -> Chunk)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to read runner output");
                break;
            }
        }
    }
}

fn header(request: &RunRequest) -> String {
    match &request.scenario {
        Some(name) => format!("Running scenario '{name}' in {}", request.target.display()),
        None => format!("Running {}", request.target.display()),
    }
}

fn command_line(java: &Path, args: &[String]) -> String {
    let mut line = shell_quote(&java.display().to_string());
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(shell_quote("-jar"), "-jar");
        assert_eq!(shell_quote("/opt/karate-1.4.0-all.jar"), "/opt/karate-1.4.0-all.jar");
        assert_eq!(shell_quote("create user"), "'create user'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn header_names_scenario() {
        assert_eq!(header(&RunRequest::feature("a.feature")), "Running a.feature");
        assert_eq!(
            header(&RunRequest::scenario("a.feature", "login")),
            "Running scenario 'login' in a.feature"
        );
    }

    #[test]
    fn args_include_scenario_filter_and_logback() {
        let dir = tempfile::TempDir::new().unwrap();
        let launcher = Launcher::new(
            dir.path(),
            Config {
                output_mode: karate_core::OutputMode::Logback,
                logback_file: Some(PathBuf::from("logback-test.xml")),
                ..Config::default()
            },
        );
        let args = launcher.command_args(
            Path::new("/cache/karate.jar"),
            &RunRequest::scenario("users.feature", "create user"),
        );
        assert_eq!(
            args,
            vec![
                format!(
                    "-Dlogback.configurationFile={}",
                    dir.path().join("logback-test.xml").display()
                ),
                "-jar".to_string(),
                "/cache/karate.jar".to_string(),
                "users.feature".to_string(),
                "--name".to_string(),
                "create user".to_string(),
            ]
        );
    }

    #[test]
    fn workspace_logback_is_used_in_extension_mode() {
        let dir = tempfile::TempDir::new().unwrap();
        let launcher = Launcher::new(dir.path(), Config::default());
        let args = launcher.command_args(Path::new("k.jar"), &RunRequest::feature("a.feature"));
        assert_eq!(args[0], "-jar");

        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join(WORKSPACE_LOGBACK), "<configuration/>").unwrap();
        let args = launcher.command_args(Path::new("k.jar"), &RunRequest::feature("a.feature"));
        assert!(args[0].starts_with("-Dlogback.configurationFile="));
        assert!(args[0].ends_with("logback.xml"));
    }

    #[test]
    fn guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = RunningGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(RunningGuard::acquire(&flag).is_none());
        drop(first);
        assert!(RunningGuard::acquire(&flag).is_some());
    }
}
