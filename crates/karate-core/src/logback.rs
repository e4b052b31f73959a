//! Logback configuration files used by the `logback` output mode.

use crate::features::find_files;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// File written by [`create_default`].
pub const DEFAULT_LOGBACK_FILE: &str = "logback-test.xml";

/// Console appender with Karate and `karate.print` at INFO.
pub const DEFAULT_LOGBACK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<configuration>
    <appender name="STDOUT" class="ch.qos.logback.core.ConsoleAppender">
        <encoder>
            <pattern>%d{HH:mm:ss.SSS} [%thread] %-5level %logger{36} - %msg%n</pattern>
        </encoder>
    </appender>

    <logger name="com.intuit.karate" level="INFO"/>
    <logger name="karate.print" level="INFO"/>

    <root level="INFO">
        <appender-ref ref="STDOUT" />
    </root>
</configuration>
"#;

/// Workspace-relative paths of `*logback*.xml` files, sorted.
pub fn find_logback_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let files = find_files(root, &is_logback_file)?;
    Ok(files
        .into_iter()
        .map(|path| path.strip_prefix(root).map(Path::to_path_buf).unwrap_or(path))
        .collect())
}

fn is_logback_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "xml")
        && path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains("logback"))
}

/// Write [`DEFAULT_LOGBACK_XML`] to `<root>/logback-test.xml` unless the file
/// already exists. Returns the workspace-relative path either way.
pub fn create_default(root: &Path) -> io::Result<PathBuf> {
    let path = root.join(DEFAULT_LOGBACK_FILE);
    if !path.exists() {
        std::fs::write(&path, DEFAULT_LOGBACK_XML)?;
        info!(path = %path.display(), "created default logback configuration");
    }
    Ok(PathBuf::from(DEFAULT_LOGBACK_FILE))
}
