//! Download and cache of the Karate standalone JAR.
//!
//! The JAR lives at `<cache_dir>/karate-<version>-all.jar`. A cached file
//! with a valid ZIP signature is reused without touching the network;
//! otherwise the download is retried with a fixed delay. Each attempt
//! streams into a `.tmp` sibling that is renamed into place once complete.

use karate_core::{ArtifactRecord, Config};
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Local file header signature every JAR starts with.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

const USER_AGENT: &str = concat!("karate-runner/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("redirect from {url} has no usable Location header")]
    BadRedirect { url: String },
    #[error("more than one redirect from {url}")]
    TooManyRedirects { url: String },
    #[error("no data received for {}s", .0.as_secs())]
    IdleTimeout(Duration),
    #[error("downloaded file is not a valid JAR")]
    InvalidArchive,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("download failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DownloadError>,
    },
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Transport that writes the body at `url` into `dest`.
pub trait ArtifactSource {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    fn fetch(&self, url: &str, dest: &Path) -> impl Future<Output = Result<u64>> + Send;
}

/// HTTPS transport with manual single-hop redirects and an idle timeout.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    idle_timeout: Duration,
}

impl HttpSource {
    pub fn new(idle_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .connect_timeout(idle_timeout)
            .build()?;
        Ok(Self {
            client,
            idle_timeout,
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send();
        timeout(self.idle_timeout, request)
            .await
            .map_err(|_| DownloadError::IdleTimeout(self.idle_timeout))?
            .map_err(DownloadError::from)
    }

    /// GET `url`, following at most one 301/302.
    async fn open(&self, url: &str) -> Result<Response> {
        let response = self.get(url).await?;
        if !matches!(response.status(), StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND) {
            return Ok(response);
        }

        let target = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| response.url().join(location).ok())
            .ok_or_else(|| DownloadError::BadRedirect {
                url: url.to_string(),
            })?;
        debug!(from = url, to = %target, "following redirect");

        let response = self.get(target.as_str()).await?;
        if response.status().is_redirection() {
            return Err(DownloadError::TooManyRedirects {
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

impl ArtifactSource for HttpSource {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.open(url).await?;
        if response.status() != StatusCode::OK {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let mut reported_decile = 0;

        loop {
            let chunk = timeout(self.idle_timeout, response.chunk())
                .await
                .map_err(|_| DownloadError::IdleTimeout(self.idle_timeout))??;
            let Some(chunk) = chunk else {
                break;
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = total {
                let decile = written.saturating_mul(10) / total;
                if decile > reported_decile {
                    reported_decile = decile;
                    info!(percent = decile.min(10) * 10, bytes = written, "download progress");
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Ensures the Karate JAR for one version is present locally.
#[derive(Debug)]
pub struct ArtifactManager<S = HttpSource> {
    source: S,
    version: String,
    url: String,
    cache_dir: PathBuf,
    retries: u32,
    retry_delay: Duration,
}

impl ArtifactManager<HttpSource> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = HttpSource::new(Duration::from_secs(config.download_timeout_sec.max(1)))?;
        let cache_dir = config.cache_dir.clone().unwrap_or_else(default_cache_dir);
        Ok(
            Self::new(source, &config.karate_version, config.artifact_url(), cache_dir)
                .with_retries(
                    config.download_retries,
                    Duration::from_millis(config.download_retry_delay_ms),
                ),
        )
    }
}

impl<S: ArtifactSource> ArtifactManager<S> {
    pub fn new(
        source: S,
        version: impl Into<String>,
        url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            version: version.into(),
            url: url.into(),
            cache_dir: cache_dir.into(),
            retries: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }

    /// Set the attempt budget (minimum 1) and the delay between attempts.
    #[must_use]
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn artifact_path(&self) -> PathBuf {
        artifact_path(&self.cache_dir, &self.version)
    }

    /// Return the cached JAR, downloading it first if needed.
    pub async fn ensure(&self) -> Result<ArtifactRecord> {
        let path = self.artifact_path();

        if fs::try_exists(&path).await? {
            if is_valid_archive(&path).await? {
                debug!(path = %path.display(), "using cached artifact");
                return self.record(path).await;
            }
            warn!(path = %path.display(), "cached artifact is corrupt; removing");
            fs::remove_file(&path).await?;
        }

        fs::create_dir_all(&self.cache_dir).await?;

        let mut last_error = None;
        for attempt in 1..=self.retries {
            info!(
                attempt,
                attempts = self.retries,
                url = %self.url,
                version = %self.version,
                "downloading Karate"
            );

            match self.attempt(&path).await {
                Ok(()) => return self.record(path).await,
                Err(err) => {
                    warn!(attempt, error = %err, "download attempt failed");
                    last_error = Some(err);
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(DownloadError::Exhausted {
            attempts: self.retries,
            last: Box::new(last_error.unwrap_or(DownloadError::InvalidArchive)),
        })
    }

    async fn attempt(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path(path);
        remove_if_exists(&tmp).await;

        if let Err(err) = self.source.fetch(&self.url, &tmp).await {
            remove_if_exists(&tmp).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp, path).await {
            remove_if_exists(&tmp).await;
            return Err(err.into());
        }

        if !is_valid_archive(path).await? {
            remove_if_exists(path).await;
            return Err(DownloadError::InvalidArchive);
        }
        Ok(())
    }

    async fn record(&self, path: PathBuf) -> Result<ArtifactRecord> {
        let sha256 = match sha256_file(path.clone()).await {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to hash artifact");
                None
            }
        };
        Ok(ArtifactRecord {
            version: self.version.clone(),
            path,
            valid: true,
            sha256,
        })
    }
}

/// Cache path for a version.
pub fn artifact_path(cache_dir: &Path, version: &str) -> PathBuf {
    cache_dir.join(format!("karate-{version}-all.jar"))
}

/// Platform data directory, falling back to the temp dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("karate-runner")
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove file");
        }
    }
}

/// Whether the file starts with the ZIP local header signature.
pub async fn is_valid_archive(path: &Path) -> io::Result<bool> {
    let mut file = fs::File::open(path).await?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic).await {
        Ok(_) => Ok(magic == ZIP_MAGIC),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(err),
    }
}

async fn sha256_file(path: PathBuf) -> io::Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const JAR: &[u8] = b"PK\x03\x04fake jar body";

    /// Source that fails with HTTP 500 a fixed number of times, then succeeds.
    #[derive(Debug)]
    struct Flaky {
        failures: u32,
        body: &'static [u8],
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32, body: &'static [u8]) -> Self {
            Self {
                failures,
                body,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtifactSource for Flaky {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                // Leave a partial file behind like an interrupted download.
                fs::write(dest, b"PK\x03").await?;
                return Err(DownloadError::Status {
                    status: 500,
                    url: url.to_string(),
                });
            }
            fs::write(dest, self.body).await?;
            Ok(self.body.len() as u64)
        }
    }

    fn manager(dir: &TempDir, source: Flaky) -> ArtifactManager<Flaky> {
        ArtifactManager::new(source, "1.4.0", "https://example.invalid/karate.jar", dir.path())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_server_errors() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Flaky::new(2, JAR));

        let started = tokio::time::Instant::now();
        let record = mgr.ensure().await.unwrap();

        assert_eq!(mgr.source.calls(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
        assert!(record.valid);
        assert_eq!(record.path, dir.path().join("karate-1.4.0-all.jar"));
        assert_eq!(std::fs::read(&record.path).unwrap(), JAR);
        assert!(!tmp_path(&record.path).exists());
        assert_eq!(record.sha256.as_deref().map(str::len), Some(64));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Flaky::new(10, JAR));

        let err = mgr.ensure().await.unwrap_err();
        match err {
            DownloadError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, DownloadError::Status { status: 500, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(mgr.source.calls(), 3);
        assert!(!mgr.artifact_path().exists());
        assert!(!tmp_path(&mgr.artifact_path()).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_download_is_deleted_and_retried() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Flaky::new(0, b"<html>not a jar</html>"))
            .with_retries(2, Duration::from_millis(10));

        let err = mgr.ensure().await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Exhausted { attempts: 2, ref last } if matches!(**last, DownloadError::InvalidArchive)
        ));
        assert_eq!(mgr.source.calls(), 2);
        assert!(!mgr.artifact_path().exists());
    }

    #[tokio::test]
    async fn valid_cache_skips_the_source() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Flaky::new(0, JAR));
        std::fs::write(mgr.artifact_path(), JAR).unwrap();

        let record = mgr.ensure().await.unwrap();
        assert_eq!(mgr.source.calls(), 0);
        assert_eq!(record.version, "1.4.0");
    }

    #[tokio::test]
    async fn corrupt_cache_is_replaced() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir, Flaky::new(0, JAR));
        std::fs::write(mgr.artifact_path(), b"garbage").unwrap();

        mgr.ensure().await.unwrap();
        assert_eq!(mgr.source.calls(), 1);
        assert_eq!(std::fs::read(mgr.artifact_path()).unwrap(), JAR);
    }

    fn http_manager(dir: &TempDir, url: String) -> ArtifactManager<HttpSource> {
        let source = HttpSource::new(Duration::from_secs(5)).unwrap();
        ArtifactManager::new(source, "1.4.0", url, dir.path())
            .with_retries(2, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn second_ensure_makes_no_request() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/karate.jar")
                    .header("accept", "application/octet-stream");
                then.status(200).body(JAR);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let mgr = http_manager(&dir, server.url("/karate.jar"));
        let first = mgr.ensure().await.unwrap();
        let second = mgr.ensure().await.unwrap();

        mock.assert_hits_async(1).await;
        assert_eq!(first.path, second.path);
        assert_eq!(first.sha256, second.sha256);
    }

    #[tokio::test]
    async fn follows_a_single_redirect() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let redirect = server
            .mock_async(|when, then| {
                when.method(GET).path("/latest.jar");
                then.status(302).header("Location", "/assets/karate.jar");
            })
            .await;
        let asset = server
            .mock_async(|when, then| {
                when.method(GET).path("/assets/karate.jar");
                then.status(200).body(JAR);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let record = http_manager(&dir, server.url("/latest.jar"))
            .ensure()
            .await
            .unwrap();

        redirect.assert_hits_async(1).await;
        asset.assert_hits_async(1).await;
        assert_eq!(std::fs::read(record.path).unwrap(), JAR);
    }

    #[tokio::test]
    async fn not_found_exhausts_retries() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.jar");
                then.status(404);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let mgr = http_manager(&dir, server.url("/missing.jar"));
        let err = mgr.ensure().await.unwrap_err();

        mock.assert_hits_async(2).await;
        match err {
            DownloadError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, DownloadError::Status { status: 404, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(!mgr.artifact_path().exists());
    }

    #[tokio::test]
    async fn short_file_is_not_an_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.jar");
        std::fs::write(&path, b"PK").unwrap();
        assert!(!is_valid_archive(&path).await.unwrap());
    }
}
