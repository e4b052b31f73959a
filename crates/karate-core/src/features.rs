//! Discovery and light parsing of `.feature` files.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const FEATURE_EXT: &str = "feature";

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "build"];

/// Folder label used for features at the workspace root.
pub const ROOT_FOLDER: &str = "Root";

/// A `Scenario:` or `Scenario Outline:` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    /// 1-based line of the declaration.
    pub line: usize,
    pub outline: bool,
    /// `@tags` on the lines directly above, without the `@`.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFile {
    pub path: PathBuf,
    /// Text after `Feature:`, if declared.
    pub title: Option<String>,
    pub scenarios: Vec<Scenario>,
}

impl FeatureFile {
    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            title: feature_title(&text),
            scenarios: parse_scenarios(&text),
        })
    }
}

/// Recursively collect `*.feature` files under `root`, sorted.
///
/// Hidden directories and build output are skipped. Unreadable
/// subdirectories are logged and skipped; only an unreadable root fails.
pub fn find_features(root: &Path) -> io::Result<Vec<PathBuf>> {
    find_files(root, &|path| path.extension().is_some_and(|ext| ext == FEATURE_EXT))
}

/// Recursively collect files under `root` accepted by `keep`, sorted, with
/// the same directory skipping as [`find_features`].
pub(crate) fn find_files(root: &Path, keep: &dyn Fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    walk(root, &mut found, true, keep)?;
    found.sort();
    Ok(found)
}

fn walk(
    dir: &Path,
    found: &mut Vec<PathBuf>,
    is_root: bool,
    keep: &dyn Fn(&Path) -> bool,
) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if !is_root => {
            debug!(dir = %dir.display(), error = %err, "skipping unreadable directory");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if name.starts_with('.') || SKIP_DIRS.contains(&&*name) {
                continue;
            }
            walk(&path, found, false, keep)?;
        } else if keep(&path) {
            found.push(path);
        }
    }
    Ok(())
}

pub fn feature_title(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.trim().strip_prefix("Feature:"))
        .map(|title| title.trim().to_string())
}

/// Scenario declarations in document order.
pub fn parse_scenarios(text: &str) -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    let mut tags = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if line.starts_with('@') {
            tags.extend(
                line.split_whitespace()
                    .filter_map(|t| t.strip_prefix('@'))
                    .map(str::to_string),
            );
            continue;
        }
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let declaration = line
            .strip_prefix("Scenario Outline:")
            .map(|name| (name, true))
            .or_else(|| line.strip_prefix("Scenario:").map(|name| (name, false)));

        if let Some((name, outline)) = declaration {
            scenarios.push(Scenario {
                name: name.trim().to_string(),
                line: idx + 1,
                outline,
                tags: std::mem::take(&mut tags),
            });
        } else {
            tags.clear();
        }
    }

    scenarios
}

/// Nearest scenario declared at or above `line` (1-based).
pub fn scenario_at_line(text: &str, line: usize) -> Option<Scenario> {
    parse_scenarios(text)
        .into_iter()
        .take_while(|s| s.line <= line)
        .last()
}

/// Group feature paths by their folder relative to `root`.
///
/// Features directly under `root` land in [`ROOT_FOLDER`]. Folder keys use
/// `/` separators; paths inside each folder are sorted.
pub fn group_by_folder(root: &Path, features: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut folders: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();

    for feature in features {
        let relative = feature.strip_prefix(root).unwrap_or(feature);
        let folder = relative
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(
                || ROOT_FOLDER.to_string(),
                |p| {
                    p.components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/")
                },
            );
        folders.entry(folder).or_default().push(feature.clone());
    }

    for paths in folders.values_mut() {
        paths.sort();
    }
    folders
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const LOGIN: &str = "\
@auth
Feature: Login

  Background:
    * url baseUrl

  @smoke @fast
  Scenario: valid credentials
    Given path 'login'
    When method post
    Then status 200

  # comment between tags and scenario
  @regression
  # another
  Scenario Outline: bad password <pw>
    Given path 'login'

    Examples:
      | pw |
      | x  |

  Scenario:   logout
    * print 'bye'
";

    #[test]
    fn parses_scenarios_with_lines_and_tags() {
        let scenarios = parse_scenarios(LOGIN);
        assert_eq!(
            scenarios,
            vec![
                Scenario {
                    name: "valid credentials".into(),
                    line: 8,
                    outline: false,
                    tags: vec!["smoke".into(), "fast".into()],
                },
                Scenario {
                    name: "bad password <pw>".into(),
                    line: 16,
                    outline: true,
                    tags: vec!["regression".into()],
                },
                Scenario {
                    name: "logout".into(),
                    line: 23,
                    outline: false,
                    tags: vec![],
                },
            ]
        );
        assert_eq!(feature_title(LOGIN).as_deref(), Some("Login"));
    }

    #[test]
    fn scenario_at_line_picks_nearest_above() {
        assert!(scenario_at_line(LOGIN, 5).is_none());
        assert_eq!(scenario_at_line(LOGIN, 8).unwrap().name, "valid credentials");
        assert_eq!(scenario_at_line(LOGIN, 11).unwrap().name, "valid credentials");
        assert_eq!(scenario_at_line(LOGIN, 19).unwrap().name, "bad password <pw>");
        assert_eq!(scenario_at_line(LOGIN, 500).unwrap().name, "logout");
    }

    #[test]
    fn finds_features_skipping_build_and_hidden_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        for rel in [
            "root.feature",
            "src/test/users/login.feature",
            "src/test/users/notes.txt",
            "src/test/health.feature",
            "target/classes/copied.feature",
            "node_modules/pkg/x.feature",
            ".git/hidden.feature",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "Feature: x\n").unwrap();
        }

        let found = find_features(root).unwrap();
        assert_eq!(
            found,
            vec![
                root.join("root.feature"),
                root.join("src/test/health.feature"),
                root.join("src/test/users/login.feature"),
            ]
        );

        let folders = group_by_folder(root, &found);
        let keys: Vec<_> = folders.keys().cloned().collect();
        assert_eq!(keys, vec!["Root", "src/test", "src/test/users"]);
        assert_eq!(folders["Root"], vec![root.join("root.feature")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(find_features(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn loads_feature_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("login.feature");
        fs::write(&path, LOGIN).unwrap();
        let feature = FeatureFile::load(&path).unwrap();
        assert_eq!(feature.title.as_deref(), Some("Login"));
        assert_eq!(feature.scenarios.len(), 3);
    }
}
