//! Persistent run history.
//!
//! A JSON array of [`RunRecord`] stored at
//! `<workspace>/.karate-runner/history.json`, newest first and capped at a
//! fixed number of entries. Every operation reads and rewrites the whole
//! file; writers inside one process are serialized by a mutex and the file
//! is replaced atomically via a temp file and rename.

use crate::config::STATE_DIR;
use crate::types::RunRecord;
use chrono::{DateTime, Days, TimeZone};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

pub const HISTORY_FILE: &str = "history.json";

/// Default number of records kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("history lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Path of the history file inside a workspace.
pub fn history_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(STATE_DIR).join(HISTORY_FILE)
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    lock: Mutex<()>,
}

impl HistoryStore {
    /// Open the store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: DEFAULT_HISTORY_LIMIT,
            lock: Mutex::new(()),
        }
    }

    /// Open the store for a workspace.
    pub fn for_workspace(workspace_root: &Path) -> Self {
        Self::open(history_path(workspace_root))
    }

    /// Override the entry cap (minimum 1).
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepend a record and drop entries beyond the cap.
    pub fn record(&self, run: RunRecord) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| HistoryError::Poisoned)?;
        let mut records = self.load()?;
        records.insert(0, run);
        records.truncate(self.limit);
        self.persist(&records)
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        let _guard = self.lock.lock().map_err(|_| HistoryError::Poisoned)?;
        let mut records = self.load()?;
        records.truncate(self.limit);
        Ok(records)
    }

    /// Remove the record with `id`. Returns whether one was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().map_err(|_| HistoryError::Poisoned)?;
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.id.as_ref() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.persist(&records)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| HistoryError::Poisoned)?;
        self.persist(&[])
    }

    fn load(&self) -> Result<Vec<RunRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HistoryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(err) => {
                let backup = self.corrupt_path();
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "history file is corrupt, moving it aside and starting empty"
                );
                fs::rename(&self.path, &backup).map_err(|source| HistoryError::Io {
                    path: backup,
                    source,
                })?;
                Ok(Vec::new())
            }
        }
    }

    /// Where an unreadable history file is kept, e.g. `history.json.corrupt`.
    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    fn persist(&self, records: &[RunRecord]) -> Result<()> {
        let io_err = |source| HistoryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&json).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), count = records.len(), "history written");
        Ok(())
    }
}

/// Recency bucket used when listing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgeGroup {
    Today,
    Yesterday,
    LastWeek,
    Older,
}

impl AgeGroup {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::LastWeek => "Last 7 days",
            Self::Older => "Older",
        }
    }
}

/// Bucket records by calendar day relative to `now`, in `now`'s time zone.
///
/// Groups come out in recency order and empty groups are omitted; records
/// keep their order inside a group.
pub fn group_by_age<'a, Tz: TimeZone>(
    records: &'a [RunRecord],
    now: &DateTime<Tz>,
) -> Vec<(AgeGroup, Vec<&'a RunRecord>)> {
    let today = now.date_naive();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let last_week = today.checked_sub_days(Days::new(7)).unwrap_or(today);

    let mut groups: Vec<(AgeGroup, Vec<&RunRecord>)> = Vec::new();
    for record in records {
        let day = record.timestamp.with_timezone(&now.timezone()).date_naive();
        let group = if day >= today {
            AgeGroup::Today
        } else if day >= yesterday {
            AgeGroup::Yesterday
        } else if day >= last_week {
            AgeGroup::LastWeek
        } else {
            AgeGroup::Older
        };
        match groups.iter_mut().find(|(g, _)| *g == group) {
            Some((_, members)) => members.push(record),
            None => groups.push((group, vec![record])),
        }
    }
    groups.sort_by_key(|(g, _)| *g);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Verdict;
    use tempfile::TempDir;

    fn record(feature: &str, result: Verdict) -> RunRecord {
        RunRecord::new(feature, None, result, "target/karate-reports/karate-summary.html")
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        assert!(store.list().unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn records_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        store.record(record("a.feature", Verdict::Passed)).unwrap();
        store.record(record("b.feature", Verdict::Failed)).unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].feature, "b.feature");
        assert_eq!(list[1].feature, "a.feature");
        assert_eq!(
            store.path(),
            dir.path().join(".karate-runner").join("history.json")
        );
    }

    #[test]
    fn cap_drops_oldest_entry() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        for i in 0..=DEFAULT_HISTORY_LIMIT {
            store
                .record(record(&format!("f{i}.feature"), Verdict::Passed))
                .unwrap();
        }

        let list = store.list().unwrap();
        assert_eq!(list.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(list[0].feature, "f100.feature");
        assert_eq!(list.last().unwrap().feature, "f1.feature");
        assert!(list.iter().all(|r| r.feature != "f0.feature"));
    }

    #[test]
    fn custom_limit() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path()).with_limit(2);
        for name in ["a", "b", "c"] {
            store.record(record(name, Verdict::Passed)).unwrap();
        }
        let names: Vec<_> = store.list().unwrap().into_iter().map(|r| r.feature).collect();
        assert_eq!(names, vec!["c", "b"]);
    }

    #[test]
    fn remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        let keep = record("keep.feature", Verdict::Passed);
        let drop = record("drop.feature", Verdict::Failed);
        let drop_id = drop.id.clone();
        store.record(keep).unwrap();
        store.record(drop).unwrap();

        assert!(store.remove(drop_id.as_ref()).unwrap());
        assert!(!store.remove(drop_id.as_ref()).unwrap());
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].feature, "keep.feature");

        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{not json").unwrap();

        store.record(record("a.feature", Verdict::Passed)).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        let backup = store.path().with_file_name("history.json.corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
    }

    #[test]
    fn groups_by_recency() {
        use chrono::{TimeZone, Utc};

        let now = Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap();
        let stamped = |feature: &str, y, m, d| {
            let mut r = record(feature, Verdict::Passed);
            r.timestamp = Utc.with_ymd_and_hms(y, m, d, 23, 0, 0).unwrap();
            r
        };
        let records = vec![
            stamped("old", 2024, 1, 1),
            stamped("today", 2024, 5, 10),
            stamped("week", 2024, 5, 4),
            stamped("yesterday", 2024, 5, 9),
            stamped("today2", 2024, 5, 10),
        ];

        let groups = group_by_age(&records, &now);
        let shape: Vec<_> = groups
            .iter()
            .map(|(g, rs)| (g.label(), rs.iter().map(|r| r.feature.as_str()).collect::<Vec<_>>()))
            .collect();
        assert_eq!(
            shape,
            vec![
                ("Today", vec!["today", "today2"]),
                ("Yesterday", vec!["yesterday"]),
                ("Last 7 days", vec!["week"]),
                ("Older", vec!["old"]),
            ]
        );
    }

    #[test]
    fn reads_existing_camel_case_file() {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::for_workspace(dir.path());
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(
            store.path(),
            r#"[{"id":"1","feature":"login.feature","timestamp":"2024-05-01T10:00:00Z",
                "result":"failed","reportPath":"target/karate-reports/x.html",
                "durationMs":1200,"scenariosPassed":1,"scenariosFailed":1}]"#,
        )
        .unwrap();

        let list = store.list().unwrap();
        assert_eq!(list[0].result, Verdict::Failed);
        assert_eq!(list[0].duration_ms, Some(1200));
        assert_eq!(list[0].scenarios_failed, Some(1));
        assert!(list[0].scenario.is_none());
    }
}
