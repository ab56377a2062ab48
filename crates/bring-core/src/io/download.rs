//! HTTP downloads with bounded retry.
//!
//! Files are streamed to a `.part` sibling and renamed into place once
//! complete, so an existing destination is always a fully-written file and
//! short-circuits the fetch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::Reporter;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("giving up on {url} after {attempts} attempt(s): {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

impl DownloadError {
    /// Whether another attempt could succeed.
    fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) => true,
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::HashMismatch { .. } | Self::Exhausted { .. } => false,
        }
    }
}

/// Request for a download operation
pub struct DownloadRequest<'a> {
    pub client: &'a Client,
    pub url: &'a str,
    pub dest: &'a Path,
    pub expected_hash: Option<&'a str>,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub reporter: &'a dyn Reporter,
}

impl DownloadRequest<'_> {
    /// Fetch `url` into `dest`, retrying transient failures with a fixed delay.
    ///
    /// Returns immediately if `dest` already exists.
    pub async fn execute(&self) -> Result<PathBuf, DownloadError> {
        if tokio::fs::try_exists(self.dest).await.unwrap_or(false) {
            debug!(url = self.url, dest = %self.dest.display(), "download already present");
            return Ok(self.dest.to_path_buf());
        }
        if let Some(parent) = self.dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let attempts = self.attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            match self.attempt().await {
                Ok(()) => return Ok(self.dest.to_path_buf()),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(url = self.url, attempt, error = %e, "download failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    last = Some(e);
                }
                Err(e) if e.is_transient() => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(DownloadError::Exhausted {
            url: self.url.to_string(),
            attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(&self) -> Result<(), DownloadError> {
        let part = part_path(self.dest);
        let result = self.stream_to(&part).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result?;
        tokio::fs::rename(&part, self.dest).await?;
        Ok(())
    }

    async fn stream_to(&self, part: &Path) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(self.url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: self.url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        self.reporter.downloading(self.url, 0, total);

        let mut file = File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            self.reporter.downloading(self.url, downloaded, total);
        }
        file.flush().await?;

        if let Some(expected) = self.expected_hash {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim_start_matches("sha256:")) {
                return Err(DownloadError::HashMismatch {
                    url: self.url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Deterministic download location for `url` under `download_dir`.
pub fn cache_location(download_dir: &Path, url: &str, file_name: Option<&str>) -> PathBuf {
    let hash = blake3::hash(url.as_bytes()).to_hex();
    let name = file_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| crate::filename_from_url(url));
    let name = if name.is_empty() { "download" } else { name };
    download_dir.join(&hash.as_str()[..16]).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullReporter;

    fn request<'a>(client: &'a Client, url: &'a str, dest: &'a Path) -> DownloadRequest<'a> {
        DownloadRequest {
            client,
            url,
            dest,
            expected_hash: None,
            attempts: 3,
            retry_delay: Duration::from_millis(1),
            reporter: &NullReporter,
        }
    }

    #[tokio::test]
    async fn test_download_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tool.tar.gz")
            .with_status(200)
            .with_body("payload")
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("sub/tool.tar.gz");
        let url = format!("{}/tool.tar.gz", server.url());
        let client = Client::new();

        let path = request(&client, &url, &dest).execute().await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "payload");
        assert!(!part_path(&dest).exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_retries_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("flaky");
        let url = format!("{}/flaky", server.url());
        let client = Client::new();

        let err = request(&client, &url, &dest).execute().await.unwrap_err();
        assert!(matches!(err, DownloadError::Exhausted { attempts: 3, .. }));
        assert!(!dest.exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("missing");
        let url = format!("{}/missing", server.url());
        let client = Client::new();

        let err = request(&client, &url, &dest).execute().await.unwrap_err();
        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_existing_destination_short_circuits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/x").expect(0).create_async().await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("x");
        std::fs::write(&dest, "already here").unwrap();
        let url = format!("{}/x", server.url());
        let client = Client::new();

        request(&client, &url, &dest).execute().await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "already here");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_no_file() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/h")
            .with_body("abc")
            .create_async()
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("h");
        let url = format!("{}/h", server.url());
        let client = Client::new();
        let mut req = request(&client, &url, &dest);
        req.expected_hash = Some("00");

        let err = req.execute().await.unwrap_err();
        assert!(matches!(err, DownloadError::HashMismatch { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_cache_location_is_stable() {
        let a = cache_location(Path::new("/d"), "https://x/y/tool.zip", None);
        let b = cache_location(Path::new("/d"), "https://x/y/tool.zip", None);
        assert_eq!(a, b);
        assert!(a.ends_with("tool.zip"));
        let named = cache_location(Path::new("/d"), "https://x/y/tool.zip", Some("t.zip"));
        assert!(named.ends_with("t.zip"));
    }
}
