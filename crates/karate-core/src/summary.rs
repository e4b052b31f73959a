//! Karate report directories and their machine-readable summaries.
//!
//! Each run leaves `<build>/karate-reports[_<unix-millis>]/` behind with a
//! `karate-summary-json.txt` file and a browsable `karate-summary.html`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const REPORTS_PREFIX: &str = "karate-reports";
pub const SUMMARY_JSON: &str = "karate-summary-json.txt";
pub const SUMMARY_HTML: &str = "karate-summary.html";

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid report summary {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SummaryError>;

/// Contents of `karate-summary-json.txt`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    #[serde(default)]
    pub result_date: Option<String>,
    #[serde(default)]
    pub feature_summary: Vec<FeatureSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSummary {
    pub relative_path: String,
    #[serde(default)]
    pub duration_millis: f64,
    #[serde(default)]
    pub passed_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub failed: bool,
}

impl FeatureSummary {
    pub fn duration_ms(&self) -> u64 {
        self.duration_millis.max(0.0).round() as u64
    }

    /// Whether this entry describes `target`.
    ///
    /// Karate reports paths relative to its classpath root, so the entry
    /// matches when either path is a component-wise suffix of the other.
    pub fn matches(&self, target: &Path) -> bool {
        let rel = Path::new(
            self.relative_path
                .strip_prefix("classpath:")
                .unwrap_or(&self.relative_path),
        );
        target.ends_with(rel) || rel.ends_with(target)
    }
}

impl ReportSummary {
    /// Entry for `target`, if the summary lists it.
    pub fn feature(&self, target: &Path) -> Option<&FeatureSummary> {
        self.feature_summary.iter().find(|f| f.matches(target))
    }
}

/// A report directory and the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDir {
    pub path: PathBuf,
    /// From the `_<unix-millis>` suffix, else the directory mtime.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReportDir {
    pub fn summary_html(&self) -> PathBuf {
        report_html(&self.path)
    }
}

/// Report directories under `build_dir`, newest first.
///
/// A missing build directory yields an empty list.
pub fn report_dirs(build_dir: &Path) -> Result<Vec<ReportDir>> {
    let entries = match fs::read_dir(build_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SummaryError::Io {
                path: build_dir.to_path_buf(),
                source,
            })
        }
    };

    let mut dirs: Vec<ReportDir> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let suffix = name.strip_prefix(REPORTS_PREFIX)?;
            let timestamp = suffix_timestamp(suffix).or_else(|| {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .map(DateTime::<Utc>::from)
            });
            Some(ReportDir {
                path: entry.path(),
                timestamp,
            })
        })
        .collect();

    dirs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(dirs)
}

fn suffix_timestamp(suffix: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = suffix.strip_prefix('_')?.parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// Most recent report directory under `build_dir`.
pub fn latest_report_dir(build_dir: &Path) -> Option<PathBuf> {
    match report_dirs(build_dir) {
        Ok(dirs) => dirs.into_iter().next().map(|d| d.path),
        Err(err) => {
            debug!(error = %err, "no report directory");
            None
        }
    }
}

/// HTML summary page inside a report directory.
pub fn report_html(report_dir: &Path) -> PathBuf {
    report_dir.join(SUMMARY_HTML)
}

/// Parse the JSON summary of a report directory.
pub fn read_summary(report_dir: &Path) -> Result<ReportSummary> {
    let path = report_dir.join(SUMMARY_JSON);
    let content = fs::read_to_string(&path).map_err(|source| SummaryError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SummaryError::Parse { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUMMARY: &str = r#"{
        "version": "1.4.0",
        "resultDate": "2024-05-01 10:00:00 AM",
        "elapsedTime": 812.0,
        "featureSummary": [
            {"relativePath": "users/login.feature", "durationMillis": 640.6,
             "passedCount": 2, "failedCount": 1, "failed": true, "scenarioCount": 3},
            {"relativePath": "health.feature", "durationMillis": 12.0,
             "passedCount": 1, "failedCount": 0, "failed": false}
        ]
    }"#;

    fn write_report(build: &Path, name: &str) -> PathBuf {
        let dir = build.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SUMMARY_JSON), SUMMARY).unwrap();
        dir
    }

    #[test]
    fn parses_summary_file() {
        let tmp = TempDir::new().unwrap();
        let dir = write_report(tmp.path(), "karate-reports");

        let summary = read_summary(&dir).unwrap();
        assert_eq!(summary.result_date.as_deref(), Some("2024-05-01 10:00:00 AM"));
        assert_eq!(summary.feature_summary.len(), 2);

        let login = summary.feature(Path::new("src/test/java/users/login.feature")).unwrap();
        assert_eq!(login.passed_count, 2);
        assert_eq!(login.failed_count, 1);
        assert!(login.failed);
        assert_eq!(login.duration_ms(), 641);

        assert!(summary.feature(Path::new("health.feature")).is_some());
        assert!(summary.feature(Path::new("other/login.feature")).is_none());
    }

    #[test]
    fn invalid_summary_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("karate-reports");
        fs::create_dir_all(&dir).unwrap();
        assert!(matches!(read_summary(&dir), Err(SummaryError::Io { .. })));

        fs::write(dir.join(SUMMARY_JSON), "nope").unwrap();
        assert!(matches!(read_summary(&dir), Err(SummaryError::Parse { .. })));
    }

    #[test]
    fn report_dirs_sorted_by_suffix_timestamp() {
        let tmp = TempDir::new().unwrap();
        write_report(tmp.path(), "karate-reports_1700000000000");
        write_report(tmp.path(), "karate-reports_1710000000000");
        fs::create_dir_all(tmp.path().join("surefire-reports")).unwrap();
        fs::write(tmp.path().join("karate-reports.txt"), "file").unwrap();

        let dirs = report_dirs(tmp.path()).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].path.ends_with("karate-reports_1710000000000"));
        assert_eq!(
            dirs[0].timestamp,
            DateTime::from_timestamp_millis(1_710_000_000_000)
        );
        assert_eq!(
            latest_report_dir(tmp.path()).unwrap(),
            tmp.path().join("karate-reports_1710000000000")
        );
        assert_eq!(
            dirs[1].summary_html(),
            tmp.path()
                .join("karate-reports_1700000000000")
                .join("karate-summary.html")
        );
    }

    #[test]
    fn unsuffixed_dir_uses_mtime() {
        let tmp = TempDir::new().unwrap();
        write_report(tmp.path(), "karate-reports");
        let dirs = report_dirs(tmp.path()).unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].timestamp.is_some());
    }

    #[test]
    fn missing_build_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(report_dirs(&tmp.path().join("target")).unwrap().is_empty());
        assert!(latest_report_dir(&tmp.path().join("target")).is_none());
    }
}
