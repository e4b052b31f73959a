//! Java runtime discovery.
//!
//! Candidates are probed in order: configured/`JAVA_HOME`, a table of
//! well-known install locations for the current OS, then on macOS
//! `/usr/libexec/java_home -v <major>`. A candidate is accepted when its
//! `-version` output reports the required major version.

use karate_core::Config;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Upper bound for a single `java -version` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version\s+"([^"]+)""#).expect("version pattern is valid"));

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("Java {version} not found (searched: {})", display_paths(.searched))]
    RuntimeNotFound {
        version: String,
        searched: Vec<PathBuf>,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "nothing".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct RuntimeLocator {
    version: String,
    java_home: Option<PathBuf>,
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    use_java_home_tool: bool,
}

impl RuntimeLocator {
    /// Locator for `version` with no search locations configured.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            java_home: None,
            explicit: None,
            candidates: Vec::new(),
            use_java_home_tool: false,
        }
    }

    /// Locator using the configured home (or `JAVA_HOME`) and the OS table.
    pub fn from_config(config: &Config) -> Self {
        let java_home = config
            .java_home
            .clone()
            .or_else(|| std::env::var_os("JAVA_HOME").map(PathBuf::from));
        Self {
            java_home,
            explicit: config.java_path.clone(),
            candidates: well_known_paths(&config.java_version),
            use_java_home_tool: cfg!(target_os = "macos"),
            ..Self::new(config.java_version.clone())
        }
    }

    #[must_use]
    pub fn with_java_home(mut self, home: Option<PathBuf>) -> Self {
        self.java_home = home;
        self
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    #[must_use]
    pub fn with_explicit(mut self, java: Option<PathBuf>) -> Self {
        self.explicit = java;
        self
    }

    /// Find a java executable of the required major version.
    pub async fn find(&self) -> Result<PathBuf, LocatorError> {
        if let Some(explicit) = &self.explicit {
            if explicit.is_file() {
                info!(java = %explicit.display(), "using configured java");
                return Ok(explicit.clone());
            }
            return Err(self.not_found(vec![explicit.clone()]));
        }

        let mut searched = Vec::new();

        if let Some(home) = &self.java_home {
            let java = java_in_home(home);
            if self.accepts(&java).await {
                return Ok(java);
            }
            searched.push(java);
        }

        for candidate in &self.candidates {
            if self.accepts(candidate).await {
                return Ok(candidate.clone());
            }
            searched.push(candidate.clone());
        }

        if self.use_java_home_tool {
            if let Some(home) = self.java_home_tool().await {
                let java = java_in_home(&home);
                if self.accepts(&java).await {
                    return Ok(java);
                }
                searched.push(java);
            }
        }

        Err(self.not_found(searched))
    }

    fn not_found(&self, searched: Vec<PathBuf>) -> LocatorError {
        LocatorError::RuntimeNotFound {
            version: self.version.clone(),
            searched,
        }
    }

    async fn accepts(&self, java: &Path) -> bool {
        if !java.is_file() {
            return false;
        }
        let Some(output) = probe_version(java).await else {
            return false;
        };
        let ok = version_matches(&output, &self.version);
        debug!(java = %java.display(), accepted = ok, "probed java");
        if ok {
            info!(java = %java.display(), version = %self.version, "found java");
        }
        ok
    }

    async fn java_home_tool(&self) -> Option<PathBuf> {
        let output = timeout(
            PROBE_TIMEOUT,
            Command::new("/usr/libexec/java_home")
                .arg("-v")
                .arg(&self.version)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .ok()?
        .ok()?;
        if !output.status.success() {
            return None;
        }
        let home = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!home.is_empty()).then(|| PathBuf::from(home))
    }
}

fn java_in_home(home: &Path) -> PathBuf {
    let exe = if cfg!(windows) { "java.exe" } else { "java" };
    home.join("bin").join(exe)
}

/// Run `<java> -version` and return its stderr, falling back to stdout.
async fn probe_version(java: &Path) -> Option<String> {
    let output = timeout(
        PROBE_TIMEOUT,
        Command::new(java)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Some(stderr.into_owned())
    }
}

/// Major version from `java -version` output.
///
/// `"11.0.2"` is 11, legacy `"1.8.0_292"` is 8.
pub fn parse_major(output: &str) -> Option<u32> {
    let version = VERSION_RE.captures(output)?.get(1)?.as_str();
    let mut parts = version.split(['.', '_', '-', '+']);
    let first: u32 = parts.next()?.parse().ok()?;
    if first == 1 {
        parts.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Whether `output` reports major version `required`.
///
/// Without a quoted version string, falls back to a substring match.
pub fn version_matches(output: &str, required: &str) -> bool {
    match (parse_major(output), required.trim().parse::<u32>()) {
        (Some(major), Ok(wanted)) => major == wanted,
        (None, _) => output.contains(required),
        (Some(_), Err(_)) => false,
    }
}

/// Well-known java executables for major version `major` on this OS.
pub fn well_known_paths(major: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        let roots = [
            std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string()),
            std::env::var("ProgramFiles(x86)")
                .unwrap_or_else(|_| r"C:\Program Files (x86)".to_string()),
        ];
        roots
            .iter()
            .flat_map(|root| {
                [
                    format!("Java/jdk-{major}"),
                    format!("AdoptOpenJDK/jdk-{major}"),
                    format!("Eclipse Adoptium/jdk-{major}"),
                    format!("Amazon Corretto/jdk{major}"),
                ]
                .into_iter()
                .map(move |dir| Path::new(root).join(dir).join("bin").join("java.exe"))
            })
            .collect()
    } else if cfg!(target_os = "macos") {
        ["jdk", "adoptopenjdk", "temurin", "amazon-corretto"]
            .iter()
            .map(|vendor| {
                PathBuf::from(format!(
                    "/Library/Java/JavaVirtualMachines/{vendor}-{major}.jdk/Contents/Home/bin/java"
                ))
            })
            .collect()
    } else {
        [
            format!("/usr/lib/jvm/java-{major}-openjdk/bin/java"),
            format!("/usr/lib/jvm/java-{major}-openjdk-amd64/bin/java"),
            format!("/usr/java/jdk-{major}/bin/java"),
            format!("/usr/lib/jvm/adoptopenjdk-{major}/bin/java"),
            format!("/usr/lib/jvm/temurin-{major}/bin/java"),
            format!("/usr/lib/jvm/java-{major}/bin/java"),
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect()
    }
}
