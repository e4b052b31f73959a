//! Configuration parsing for the Karate runner.
//!
//! Key=value format stored at `.karate-runner/config` in the workspace.
//! Precedence: CLI flags > `--config` file > `.karate-runner/config` > defaults.

use crate::types::{OutputMode, StderrPolicy};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Workspace-relative directory holding config and history.
pub const STATE_DIR: &str = ".karate-runner";

/// Config file name inside [`STATE_DIR`].
pub const CONFIG_FILE: &str = "config";

/// Default Karate release.
pub const DEFAULT_KARATE_VERSION: &str = "1.4.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Artifact
    pub karate_version: String,
    /// Download URL; `None` derives the GitHub release URL from the version.
    pub karate_url: Option<String>,
    /// Cache directory; `None` uses the platform data directory.
    pub cache_dir: Option<PathBuf>,
    pub download_retries: u32,
    pub download_retry_delay_ms: u64,
    pub download_timeout_sec: u64,

    // Runtime
    pub java_version: String,
    pub java_home: Option<PathBuf>,
    /// Explicit java executable; skips discovery.
    pub java_path: Option<PathBuf>,

    // Output
    pub output_mode: OutputMode,
    pub logback_file: Option<PathBuf>,
    pub stderr_policy: StderrPolicy,
    /// Colorize classified run output on the console.
    pub color: bool,

    // History and reports
    pub history_limit: usize,
    pub report_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            karate_version: DEFAULT_KARATE_VERSION.to_string(),
            karate_url: None,
            cache_dir: None,
            download_retries: 3,
            download_retry_delay_ms: 2000,
            download_timeout_sec: 30,
            java_version: "11".to_string(),
            java_home: None,
            java_path: None,
            output_mode: OutputMode::Extension,
            logback_file: None,
            stderr_policy: StderrPolicy::Strict,
            color: false,
            history_limit: 100,
            report_dir: PathBuf::from("target"),
        }
    }
}

impl Config {
    /// Path of the workspace config file.
    pub fn workspace_file(workspace_root: &Path) -> PathBuf {
        workspace_root.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Load config for a workspace: defaults, then the workspace file, then
    /// an optional override file.
    pub fn load(workspace_root: &Path, override_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let workspace_file = Self::workspace_file(workspace_root);
        if workspace_file.exists() {
            config.load_file(&workspace_file)?;
        }
        if let Some(path) = override_path {
            config.load_file(path)?;
        }
        Ok(config)
    }

    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            match self.apply_value(key, &value) {
                Ok(()) => {}
                // Unknown keys are tolerated so older binaries can read newer files.
                Err(ConfigError::UnknownKey(key)) => tracing::warn!(key = %key, "unknown config key"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn optional_path(value: &str) -> Option<PathBuf> {
        if value.is_empty() {
            None
        } else {
            Some(PathBuf::from(value))
        }
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Apply a single config value.
    pub fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "karate_version" => self.karate_version = value.to_string(),
            "karate_url" => {
                self.karate_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "cache_dir" => self.cache_dir = Self::optional_path(value),
            "download_retries" => self.download_retries = Self::parse_int(key, value)?,
            "download_retry_delay_ms" => {
                self.download_retry_delay_ms = Self::parse_int(key, value)?;
            }
            "download_timeout_sec" => self.download_timeout_sec = Self::parse_int(key, value)?,
            "java_version" => self.java_version = value.to_string(),
            "java_home" => self.java_home = Self::optional_path(value),
            "java_path" => self.java_path = Self::optional_path(value),
            "output_mode" => {
                self.output_mode = OutputMode::parse(value).ok_or_else(|| {
                    ConfigError::InvalidLine(format!(
                        "output_mode must be 'extension' or 'logback', got '{value}'"
                    ))
                })?;
            }
            "logback_file" => self.logback_file = Self::optional_path(value),
            "stderr_policy" => {
                self.stderr_policy = StderrPolicy::parse(value).ok_or_else(|| {
                    ConfigError::InvalidLine(format!(
                        "stderr_policy must be 'strict' or 'ignore_warnings', got '{value}'"
                    ))
                })?;
            }
            "color" => self.color = Self::parse_bool(key, value)?,
            "history_limit" => self.history_limit = Self::parse_int(key, value)?,
            "report_dir" => self.report_dir = PathBuf::from(value),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Download URL for the configured version.
    pub fn artifact_url(&self) -> String {
        self.karate_url.clone().unwrap_or_else(|| {
            format!(
                "https://github.com/karatelabs/karate/releases/download/v{v}/karate-{v}.jar",
                v = self.karate_version
            )
        })
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.report_dir.is_relative() {
            self.report_dir = workspace_root.join(&self.report_dir);
        }
        if let Some(ref logback) = self.logback_file {
            if logback.is_relative() {
                self.logback_file = Some(workspace_root.join(logback));
            }
        }
    }

    /// Key/value pairs in file order, for display and persistence.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        vec![
            ("karate_version", self.karate_version.clone()),
            ("karate_url", self.karate_url.clone().unwrap_or_default()),
            ("cache_dir", path(&self.cache_dir)),
            ("download_retries", self.download_retries.to_string()),
            ("download_retry_delay_ms", self.download_retry_delay_ms.to_string()),
            ("download_timeout_sec", self.download_timeout_sec.to_string()),
            ("java_version", self.java_version.clone()),
            ("java_home", path(&self.java_home)),
            ("java_path", path(&self.java_path)),
            ("output_mode", self.output_mode.as_str().to_string()),
            ("logback_file", path(&self.logback_file)),
            ("stderr_policy", self.stderr_policy.as_str().to_string()),
            ("color", self.color.to_string()),
            ("history_limit", self.history_limit.to_string()),
            ("report_dir", self.report_dir.display().to_string()),
        ]
    }
}

/// Set `key=value` in a config file, replacing an existing assignment or
/// appending a new one. Comments and unrelated lines are preserved.
///
/// The value is validated against [`Config::apply_value`] first.
pub fn write_key(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
    Config::default().apply_value(key, value)?;

    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let assignment = format!("{key}={value}");
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let matches_key = line
                .split_once('=')
                .is_some_and(|(k, _)| k.trim() == key && !line.trim_start().starts_with('#'));
            if matches_key && !replaced {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.karate_version, "1.4.0");
        assert_eq!(config.download_retries, 3);
        assert_eq!(config.download_retry_delay_ms, 2000);
        assert_eq!(config.download_timeout_sec, 30);
        assert_eq!(config.java_version, "11");
        assert_eq!(config.output_mode, OutputMode::Extension);
        assert_eq!(config.stderr_policy, StderrPolicy::Strict);
        assert_eq!(config.history_limit, 100);
    }

    #[test]
    fn parse_simple_config() {
        let mut config = Config::default();
        let content = r#"
# runner settings
karate_version="1.5.0"
output_mode=logback
logback_file='src/test/logback-test.xml'
stderr_policy=ignore_warnings
history_limit=20
color=yes
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.karate_version, "1.5.0");
        assert_eq!(config.output_mode, OutputMode::Logback);
        assert_eq!(
            config.logback_file,
            Some(PathBuf::from("src/test/logback-test.xml"))
        );
        assert_eq!(config.stderr_policy, StderrPolicy::IgnoreWarnings);
        assert_eq!(config.history_limit, 20);
        assert!(config.color);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        assert!(matches!(
            config.parse_content("download_retries=many"),
            Err(ConfigError::InvalidInt { .. })
        ));
        assert!(config.parse_content("output_mode=fancy").is_err());
        assert!(matches!(
            config.parse_content("no equals sign"),
            Err(ConfigError::InvalidLine(_))
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut config = Config::default();
        config.parse_content("made_up_key=1\njava_version=17").unwrap();
        assert_eq!(config.java_version, "17");
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(Config::unquote("\"hello\""), "hello");
        assert_eq!(Config::unquote("'world'"), "world");
        assert_eq!(Config::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn artifact_url_derives_from_version() {
        let mut config = Config::default();
        assert_eq!(
            config.artifact_url(),
            "https://github.com/karatelabs/karate/releases/download/v1.4.0/karate-1.4.0.jar"
        );
        config.karate_url = Some("https://mirror.local/karate.jar".to_string());
        assert_eq!(config.artifact_url(), "https://mirror.local/karate.jar");
    }

    #[test]
    fn load_applies_override_after_workspace_file() {
        let dir = TempDir::new().unwrap();
        let workspace_file = Config::workspace_file(dir.path());
        std::fs::create_dir_all(workspace_file.parent().unwrap()).unwrap();
        std::fs::write(&workspace_file, "java_version=17\nhistory_limit=10\n").unwrap();
        let override_file = dir.path().join("ci.config");
        std::fs::write(&override_file, "history_limit=5\n").unwrap();

        let config = Config::load(dir.path(), Some(&override_file)).unwrap();
        assert_eq!(config.java_version, "17");
        assert_eq!(config.history_limit, 5);
    }

    #[test]
    fn resolve_paths_anchors_relative_paths() {
        let mut config = Config {
            logback_file: Some(PathBuf::from("logback-test.xml")),
            ..Config::default()
        };
        config.resolve_paths(Path::new("/ws"));
        assert_eq!(config.report_dir, PathBuf::from("/ws/target"));
        assert_eq!(config.logback_file, Some(PathBuf::from("/ws/logback-test.xml")));
    }

    #[test]
    fn write_key_replaces_and_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".karate-runner/config");

        write_key(&path, "output_mode", "logback").unwrap();
        write_key(&path, "logback_file", "logback-test.xml").unwrap();
        write_key(&path, "output_mode", "extension").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "output_mode=extension\nlogback_file=logback-test.xml\n");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.output_mode, OutputMode::Extension);
    }

    #[test]
    fn write_key_validates_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        assert!(write_key(&path, "history_limit", "lots").is_err());
        assert!(matches!(
            write_key(&path, "bogus", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(!path.exists());
    }
}
