//! Messages accepted from a presentation layer.
//!
//! Encoded as JSON objects tagged by `command`, e.g.
//! `{"command": "runScenario", "path": "login.feature", "line": 12}`.

use crate::types::OutputMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Run every scenario of a feature file.
    RunFeature { path: PathBuf },
    /// Run the scenario declared at or above `line` (1-based).
    RunScenario { path: PathBuf, line: usize },
    /// Rediscover feature files.
    RefreshFeatures,
    ClearHistory,
    DeleteRun { id: String },
    /// Open an HTML report; `None` opens the latest one.
    OpenReport {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    ConfigureOutputMode {
        mode: OutputMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        logback_file: Option<PathBuf>,
    },
}

impl Command {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunFeature { .. } => "runFeature",
            Self::RunScenario { .. } => "runScenario",
            Self::RefreshFeatures => "refreshFeatures",
            Self::ClearHistory => "clearHistory",
            Self::DeleteRun { .. } => "deleteRun",
            Self::OpenReport { .. } => "openReport",
            Self::ConfigureOutputMode { .. } => "configureOutputMode",
        }
    }
}
