use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::cancel::CancelSignal;
use crate::core::error::{ProvisionError, ProvisionResult};

/// Streaming downloader. One attempt per call; callers retry by calling again.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    // ── Single file download ────────────────────────────

    /// Download `url` into `dest_dir`, naming the file after the last URL
    /// segment. Returns the local path.
    pub async fn download_to_dir(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<PathBuf> {
        let file_name = file_name_from_url(url).ok_or_else(|| {
            ProvisionError::Validation(format!("Cannot derive a file name from {url}"))
        })?;
        let dest = dest_dir.join(file_name);
        self.download_file(url, &dest, None, cancel).await?;
        Ok(dest)
    }

    /// Stream `url` to `dest`, optionally validating SHA-256.
    ///
    /// Bytes land in a sibling `.part` file that is renamed into place only
    /// after the body is complete and verified. Any failure (including
    /// cancellation) removes the part file.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        sha256_expected: Option<&str>,
        cancel: &CancelSignal,
    ) -> ProvisionResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ProvisionError::io(parent))?;
        }

        let part = part_path(dest);
        let result = cancel
            .guard(self.stream_to(url, &part, sha256_expected))
            .await;

        if let Err(err) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove partial download {:?}: {}", part, cleanup);
                }
            }
            return Err(err);
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(ProvisionError::io(dest))?;
        info!("Downloaded {} -> {:?}", url, dest);
        Ok(())
    }

    async fn stream_to(
        &self,
        url: &str,
        part: &Path,
        sha256_expected: Option<&str>,
    ) -> ProvisionResult<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        let mut hasher = Sha256::new();
        let mut written = 0_u64;

        // Write inside a block so the handle is closed before the rename.
        {
            let mut file = tokio::fs::File::create(part)
                .await
                .map_err(ProvisionError::io(part))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hasher.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(ProvisionError::io(part))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(ProvisionError::io(part))?;
        }

        debug!(
            "Streamed {} bytes (expected {:?}) from {}",
            written, total_bytes, url
        );

        if let Some(expected) = sha256_expected {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ProvisionError::DigestMismatch {
                    path: part.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(())
    }
}

/// Last non-empty path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next()?;
    let (_, path) = without_query.split_once("://").unwrap_or(("", without_query));
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .filter(|s| *s != "." && *s != "..")
}

fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()))
}

/// SHA-256 of a file already on disk, lowercase hex.
pub async fn sha256_file(path: &Path) -> ProvisionResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(ProvisionError::io(path))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
