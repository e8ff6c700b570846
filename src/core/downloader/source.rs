use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::client::{sha256_file, Downloader};
use super::release::{ReleaseClient, ReleaseSpec};
use crate::core::cancel::CancelSignal;
use crate::core::error::ProvisionResult;
use crate::core::http::build_http_client;
use crate::core::state::ProvisionerSettings;

/// Anything that can turn a [`ReleaseSpec`] into a local file.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(
        &self,
        spec: &ReleaseSpec,
        dest_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<PathBuf>;

    /// Fetch a direct URL, named after its last path segment.
    async fn fetch_url(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<PathBuf>;
}

/// Resolves against the GitHub releases API and streams the asset.
#[derive(Debug, Clone)]
pub struct GitHubAssetSource {
    releases: ReleaseClient,
    downloader: Downloader,
}

impl GitHubAssetSource {
    pub fn new(releases: ReleaseClient, downloader: Downloader) -> Self {
        Self {
            releases,
            downloader,
        }
    }

    pub fn from_settings(settings: &ProvisionerSettings) -> ProvisionResult<Self> {
        let client = build_http_client(settings.github_token.as_deref())?;
        Ok(Self::new(
            ReleaseClient::new(client.clone(), settings.github_api_base.clone()),
            Downloader::new(client),
        ))
    }
}

#[async_trait]
impl AssetSource for GitHubAssetSource {
    async fn fetch(
        &self,
        spec: &ReleaseSpec,
        dest_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<PathBuf> {
        let asset = cancel.guard(self.releases.resolve_asset(spec)).await?;
        let dest = dest_dir.join(&asset.name);
        self.downloader
            .download_file(&asset.url, &dest, asset.sha256.as_deref(), cancel)
            .await?;

        if asset.sha256.is_none() {
            let digest = sha256_file(&dest).await?;
            info!("{} has no published digest; local sha256={}", asset.name, digest);
        }
        Ok(dest)
    }

    async fn fetch_url(
        &self,
        url: &str,
        dest_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<PathBuf> {
        self.downloader.download_to_dir(url, dest_dir, cancel).await
    }
}
