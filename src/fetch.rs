//! Network transfers for repository metadata and packages.
//!
//! One [`Downloader`] per repository wraps a configured `reqwest` client:
//! timeout, retries with backoff, proxy, TLS options and basic auth all
//! come from the repo and main configuration. `file://` URLs are served
//! by filesystem copy through the same interface, which keeps local
//! repositories and the test suite entirely off the network.
//!
//! Batch downloads run over one client with a fixed small parallelism,
//! the multiplexed-transfer model: order of completion is irrelevant but
//! every transfer must succeed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::MainConfig;
use crate::config::repo::RepoConfig;
use crate::error::{Error, Result};

/// Fixed parallelism for batch downloads.
pub const DOWNLOAD_PARALLELISM: usize = 4;

/// Address-family preference from `-4`/`-6`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpPolicy {
    /// Use whatever the resolver returns.
    #[default]
    Any,
    /// Force IPv4.
    V4,
    /// Force IPv6.
    V6,
}

/// One batch download request.
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Source URL.
    pub url: String,
    /// Final destination path.
    pub dest: PathBuf,
}

/// A configured transfer client for one repository.
pub struct Downloader {
    client: reqwest::Client,
    retries: u32,
    repo_id: String,
}

impl Downloader {
    /// What: Build a client from repo and main configuration.
    ///
    /// Inputs:
    /// - `repo`: Per-repo transfer options (timeout, TLS, auth, retries).
    /// - `main`: Proxy settings shared by all repos.
    /// - `ip`: Address-family preference.
    ///
    /// Output:
    /// - A ready client; building fails only on malformed proxy URLs or
    ///   unreadable TLS material.
    pub fn new(repo: &RepoConfig, main: &MainConfig, ip: IpPolicy) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if repo.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(repo.timeout));
        }
        if !repo.ssl_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &repo.ssl_ca_cert {
            let pem = std::fs::read(ca).map_err(|e| Error::io(ca, e))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| Error::Network {
                url: ca.display().to_string(),
                status: None,
                detail: format!("invalid CA certificate: {e}"),
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&repo.ssl_client_cert, &repo.ssl_client_key) {
            let cert_pem = std::fs::read(cert).map_err(|e| Error::io(cert, e))?;
            let key_pem = std::fs::read(key).map_err(|e| Error::io(key, e))?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem).map_err(|e| {
                Error::Network {
                    url: cert.display().to_string(),
                    status: None,
                    detail: format!("invalid client certificate: {e}"),
                }
            })?;
            builder = builder.identity(identity);
        }
        if let Some(proxy_url) = &main.proxy {
            let mut proxy = reqwest::Proxy::all(proxy_url).map_err(|e| Error::Network {
                url: proxy_url.clone(),
                status: None,
                detail: format!("invalid proxy: {e}"),
            })?;
            if let (Some(user), Some(pass)) = (&main.proxy_username, &main.proxy_password) {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }
        match ip {
            IpPolicy::Any => {}
            IpPolicy::V4 => {
                builder = builder.local_address(std::net::IpAddr::from([0, 0, 0, 0]));
            }
            IpPolicy::V6 => {
                builder = builder.local_address(std::net::IpAddr::from([0u16; 8]));
            }
        }

        let client = builder.build().map_err(|e| Error::Network {
            url: String::new(),
            status: None,
            detail: format!("cannot build transfer client: {e}"),
        })?;

        Ok(Self {
            client,
            retries: repo.retries.max(1),
            repo_id: repo.id.clone(),
        })
    }

    /// What: Fetch a URL fully into memory.
    ///
    /// Inputs:
    /// - `url`: `http(s)://` or `file://` source.
    /// - `auth`: Basic-auth pair for remote URLs.
    ///
    /// Output:
    /// - The body bytes after retries are exhausted or the first
    ///   non-retryable failure.
    pub async fn fetch_bytes(&self, url: &str, auth: Option<(&str, &str)>) -> Result<Vec<u8>> {
        if let Some(path) = file_url_path(url) {
            return tokio::fs::read(&path)
                .await
                .map_err(|e| map_file_error(url, &path, e));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_fetch(url, auth).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    if attempt >= self.retries || !is_retryable(&err) {
                        return Err(err);
                    }
                    let delay = Duration::from_millis(250 * u64::from(attempt.min(20)));
                    debug!(repo = %self.repo_id, url, attempt, "retrying transfer");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// What: Fetch a URL into a file, atomically.
    ///
    /// Inputs:
    /// - `url`: Source.
    /// - `auth`: Basic-auth pair for remote URLs.
    /// - `tmp_dir`: Scratch directory on the destination filesystem.
    /// - `dest`: Final path, written only via rename.
    ///
    /// Output:
    /// - `dest`, now containing the complete body.
    pub async fn fetch_to(
        &self,
        url: &str,
        auth: Option<(&str, &str)>,
        tmp_dir: &Path,
        dest: &Path,
    ) -> Result<PathBuf> {
        let bytes = self.fetch_bytes(url, auth).await?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let mut tmp =
            tempfile::NamedTempFile::new_in(tmp_dir).map_err(|e| Error::io(tmp_dir, e))?;
        tmp.write_all(&bytes).map_err(|e| Error::io(dest, e))?;
        tmp.as_file().sync_all().map_err(|e| Error::io(dest, e))?;
        tmp.persist(dest).map_err(|e| Error::io(dest, e.error))?;
        Ok(dest.to_path_buf())
    }

    /// What: Run a batch of downloads with bounded parallelism.
    ///
    /// Inputs:
    /// - `requests`: Files to fetch; destinations must be distinct.
    /// - `auth`: Basic-auth pair applied to every remote transfer.
    /// - `tmp_dir`: Shared scratch directory.
    ///
    /// Output:
    /// - `Ok(())` only when every transfer succeeded; the first error
    ///   aborts the remaining queue.
    pub async fn fetch_all(
        &self,
        requests: Vec<DownloadRequest>,
        auth: Option<(&str, &str)>,
        tmp_dir: &Path,
    ) -> Result<()> {
        let mut stream = futures::stream::iter(requests.into_iter().map(|req| {
            let tmp_dir = tmp_dir.to_path_buf();
            async move {
                self.fetch_to(&req.url, auth, &tmp_dir, &req.dest).await?;
                debug!(url = %req.url, "download complete");
                Ok::<_, Error>(())
            }
        }))
        .buffer_unordered(DOWNLOAD_PARALLELISM);

        while let Some(result) = stream.next().await {
            result?;
        }
        Ok(())
    }

    async fn try_fetch(&self, url: &str, auth: Option<(&str, &str)>) -> Result<Vec<u8>> {
        let mut req = self.client.get(url);
        if let Some((user, pass)) = auth {
            req = req.basic_auth(user, Some(pass));
        }
        let resp = req.send().await.map_err(|e| Error::Network {
            url: url.to_string(),
            status: None,
            detail: e.to_string(),
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Network {
                url: url.to_string(),
                status: Some(status.as_u16()),
                detail: format!("server answered {status}"),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| Error::Network {
            url: url.to_string(),
            status: Some(status.as_u16()),
            detail: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

/// Retry transport failures and server errors; give up on client errors.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Network { status, .. } => match status {
            Some(code) => *code >= 500,
            None => true,
        },
        _ => false,
    }
}

fn map_file_error(url: &str, path: &Path, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::Network {
            url: url.to_string(),
            status: Some(404),
            detail: format!("{} not found", path.display()),
        }
    } else {
        Error::io(path, e)
    }
}

/// What: Extract the filesystem path of a `file://` URL.
///
/// Output:
/// - `Some(path)` for file URLs, `None` for remote schemes.
#[must_use]
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

/// What: Join a base URL and a relative path.
///
/// Inputs:
/// - `base`: Repo base URL, with or without trailing slash.
/// - `rel`: Relative path such as `repodata/repomd.xml`.
///
/// Output:
/// - The joined URL with exactly one separating slash.
#[must_use]
pub fn join_url(base: &str, rel: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

/// Emit a warning once for transfer options the client cannot map.
pub fn warn_unsupported_tuning(repo: &RepoConfig) {
    if repo.minrate > 0 || repo.throttle > 0 {
        warn!(
            repo = %repo.id,
            "minrate/throttle are accepted but not enforced by this transfer backend"
        );
    }
}
