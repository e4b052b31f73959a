//! karate-runner - locating java, caching Karate and running features.
//!
//! Async building blocks on top of `karate-core`: the runtime locator, the
//! artifact manager, the per-session resource cache and the process
//! launcher.

pub mod artifact;
pub mod java;
pub mod launcher;
pub mod session;

pub use artifact::{ArtifactManager, ArtifactSource, DownloadError, HttpSource};
pub use java::{LocatorError, RuntimeLocator};
pub use launcher::{LaunchError, Launcher, RunOutcome};
pub use session::RunSession;
