//! Per-session cache of the resolved java runtime and Karate JAR.
//!
//! Both are resolved on first use. Successful lookups are kept for the life
//! of the session; failures are not, so the next run retries discovery.

use crate::artifact::{ArtifactManager, DownloadError};
use crate::java::{LocatorError, RuntimeLocator};
use karate_core::{ArtifactRecord, Config};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::debug;

#[derive(Debug)]
pub struct RunSession {
    config: Config,
    runtime: OnceCell<PathBuf>,
    artifact: OnceCell<ArtifactRecord>,
}

impl RunSession {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runtime: OnceCell::new(),
            artifact: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Java executable, located on first call.
    pub async fn runtime(&self) -> Result<&Path, LocatorError> {
        let path = self
            .runtime
            .get_or_try_init(|| async move {
                debug!(version = %self.config.java_version, "locating java runtime");
                RuntimeLocator::from_config(&self.config).find().await
            })
            .await?;
        Ok(path.as_path())
    }

    /// Karate JAR, downloaded on first call if not cached.
    pub async fn artifact(&self) -> Result<&ArtifactRecord, DownloadError> {
        self.artifact
            .get_or_try_init(|| async move {
                debug!(version = %self.config.karate_version, "resolving Karate artifact");
                let manager = ArtifactManager::from_config(&self.config)?;
                manager.ensure().await
            })
            .await
    }

    /// Whether both resources have been resolved.
    pub fn is_ready(&self) -> bool {
        self.runtime.initialized() && self.artifact.initialized()
    }
}
