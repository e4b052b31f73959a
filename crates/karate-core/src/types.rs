//! Core types shared by the runner, history store and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Unique identifier for run records.
/// Uses `UUIDv7` so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Final pass/fail classification of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user-initiated run of one feature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Feature file to execute.
    pub target: PathBuf,
    /// Optional scenario name passed to the runner as `--name`.
    pub scenario: Option<String>,
}

impl RunRequest {
    pub fn feature(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            scenario: None,
        }
    }

    pub fn scenario(target: impl Into<PathBuf>, scenario: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            scenario: Some(scenario.into()),
        }
    }
}

/// Counts parsed from the runner's `scenarios: N | passed: N | failed: N` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scenarios: Option<u32>,
    pub passed: Option<u32>,
    pub failed: u32,
}

/// Persisted history entry.
///
/// Field names stay camelCase so existing `history.json` files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: Id,
    pub feature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub result: Verdict,
    pub report_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios_passed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios_failed: Option<u32>,
}

impl RunRecord {
    /// Create a record stamped with a fresh id and the current time.
    pub fn new(
        feature: impl Into<String>,
        scenario: Option<String>,
        result: Verdict,
        report_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Id::new(),
            feature: feature.into(),
            scenario,
            timestamp: Utc::now(),
            result,
            report_path: report_path.into(),
            duration_ms: None,
            scenarios_passed: None,
            scenarios_failed: None,
        }
    }

    /// Set duration in milliseconds.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set scenario counts.
    pub fn with_counts(mut self, passed: u32, failed: u32) -> Self {
        self.scenarios_passed = Some(passed);
        self.scenarios_failed = Some(failed);
        self
    }
}

/// Locally cached runner artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub version: String,
    pub path: PathBuf,
    /// Result of the ZIP signature check.
    pub valid: bool,
    /// Hex SHA-256 of the file, informational only.
    pub sha256: Option<String>,
}

/// How runner output is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Classify lines, pretty-print bodies and drop banner noise.
    #[default]
    Extension,
    /// Pass lines through untouched; formatting comes from a logback config.
    Logback,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Logback => "logback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "extension" => Some(Self::Extension),
            "logback" => Some(Self::Logback),
            _ => None,
        }
    }
}

/// What stderr output means for the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StderrPolicy {
    /// Any non-whitespace stderr fails the run.
    #[default]
    Strict,
    /// `WARN` and `SLF4J:` lines are shown but do not fail the run.
    IgnoreWarnings,
}

impl StderrPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::IgnoreWarnings => "ignore_warnings",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "ignore_warnings" => Some(Self::IgnoreWarnings),
            _ => None,
        }
    }
}
