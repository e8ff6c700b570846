// ─── Release Metadata ───
// Resolves a named asset attached to a tagged GitHub release.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::error::{ProvisionError, ProvisionResult};

/// Which asset to fetch from which repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSpec {
    pub owner: String,
    pub repo: String,
    /// Exact asset file name (matched case-insensitively).
    pub asset: String,
    /// Release tag; `None` or `"latest"` means the latest release.
    #[serde(default)]
    pub tag: Option<String>,
}

impl ReleaseSpec {
    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        if tag.is_some() {
            self.tag = tag;
        }
        self
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Normalized tag, `None` meaning latest.
    pub fn pinned_tag(&self) -> Option<&str> {
        self.tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("latest"))
    }

    pub fn display_tag(&self) -> &str {
        self.pinned_tag().unwrap_or("latest")
    }
}

/// A resolved, downloadable asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub repo: String,
    pub tag: String,
    pub name: String,
    pub url: String,
    pub size: Option<u64>,
    /// Lowercase hex SHA-256 when the release publishes one.
    pub sha256: Option<String>,
}

/// Subset of the GitHub release payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
    /// `"sha256:<hex>"` on newer releases.
    #[serde(default)]
    pub digest: Option<String>,
}

impl GitHubRelease {
    /// Locate `spec.asset` by case-insensitive exact name match.
    pub fn find_asset(&self, spec: &ReleaseSpec) -> ProvisionResult<ReleaseAsset> {
        let asset = self
            .assets
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(spec.asset.trim()))
            .ok_or_else(|| ProvisionError::AssetNotFound {
                repo: spec.slug(),
                tag: self.tag_name.clone(),
                asset: spec.asset.clone(),
            })?;

        Ok(ReleaseAsset {
            repo: spec.slug(),
            tag: self.tag_name.clone(),
            name: asset.name.clone(),
            url: asset.browser_download_url.clone(),
            size: asset.size,
            sha256: asset.digest.as_deref().and_then(parse_sha256_digest),
        })
    }
}

fn parse_sha256_digest(raw: &str) -> Option<String> {
    let (algo, hex_digest) = raw.split_once(':')?;
    if !algo.eq_ignore_ascii_case("sha256") || hex_digest.len() != 64 {
        return None;
    }
    if !hex_digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hex_digest.to_ascii_lowercase())
}

/// Thin client over the releases API.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    client: Client,
    api_base: String,
}

impl ReleaseClient {
    pub fn new(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn release_url(&self, spec: &ReleaseSpec) -> String {
        match spec.pinned_tag() {
            Some(tag) => format!(
                "{}/repos/{}/{}/releases/tags/{}",
                self.api_base, spec.owner, spec.repo, tag
            ),
            None => format!(
                "{}/repos/{}/{}/releases/latest",
                self.api_base, spec.owner, spec.repo
            ),
        }
    }

    pub async fn fetch_release(&self, spec: &ReleaseSpec) -> ProvisionResult<GitHubRelease> {
        let url = self.release_url(spec);
        debug!("Fetching release metadata {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProvisionError::ReleaseNotFound {
                repo: spec.slug(),
                tag: spec.display_tag().to_string(),
            });
        }
        if !status.is_success() {
            return Err(ProvisionError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }

        Ok(response.json::<GitHubRelease>().await?)
    }

    /// Resolve the asset named by `spec` to a download URL.
    pub async fn resolve_asset(&self, spec: &ReleaseSpec) -> ProvisionResult<ReleaseAsset> {
        let release = self.fetch_release(spec).await?;
        let asset = release.find_asset(spec)?;
        info!(
            "Resolved {} {} -> {} ({})",
            asset.repo, asset.tag, asset.name, asset.url
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tag: Option<&str>) -> ReleaseSpec {
        ReleaseSpec {
            owner: "BepInEx".into(),
            repo: "BepInEx".into(),
            asset: "bepinex_win_x64_5.4.23.2.zip".into(),
            tag: tag.map(String::from),
        }
    }

    fn release_json() -> &'static str {
        r#"{
            "tag_name": "v5.4.23.2",
            "name": "BepInEx 5.4.23.2",
            "assets": [
                {
                    "name": "BepInEx_win_x86_5.4.23.2.zip",
                    "browser_download_url": "https://example.com/x86.zip",
                    "size": 10
                },
                {
                    "name": "BepInEx_win_x64_5.4.23.2.zip",
                    "browser_download_url": "https://example.com/x64.zip",
                    "size": 20,
                    "digest": "sha256:ABCDEF0123456789abcdef0123456789ABCDEF0123456789abcdef0123456789"
                }
            ]
        }"#
    }

    #[test]
    fn release_url_uses_tag_or_latest() {
        let client = ReleaseClient::new(Client::new(), "https://api.github.com/");
        assert_eq!(
            client.release_url(&spec(None)),
            "https://api.github.com/repos/BepInEx/BepInEx/releases/latest"
        );
        assert_eq!(
            client.release_url(&spec(Some("latest"))),
            "https://api.github.com/repos/BepInEx/BepInEx/releases/latest"
        );
        assert_eq!(
            client.release_url(&spec(Some("v5.4.23.2"))),
            "https://api.github.com/repos/BepInEx/BepInEx/releases/tags/v5.4.23.2"
        );
    }

    #[test]
    fn asset_lookup_is_case_insensitive_and_reads_digest() {
        let release: GitHubRelease = serde_json::from_str(release_json()).unwrap();
        let asset = release.find_asset(&spec(None)).unwrap();

        assert_eq!(asset.name, "BepInEx_win_x64_5.4.23.2.zip");
        assert_eq!(asset.url, "https://example.com/x64.zip");
        assert_eq!(asset.tag, "v5.4.23.2");
        assert_eq!(
            asset.sha256.as_deref(),
            Some("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
        );
    }

    #[test]
    fn missing_asset_is_a_typed_error() {
        let release: GitHubRelease = serde_json::from_str(release_json()).unwrap();
        let mut wanted = spec(None);
        wanted.asset = "BepInEx_linux_x64.zip".into();

        match release.find_asset(&wanted).unwrap_err() {
            ProvisionError::AssetNotFound { repo, tag, asset } => {
                assert_eq!(repo, "BepInEx/BepInEx");
                assert_eq!(tag, "v5.4.23.2");
                assert_eq!(asset, "BepInEx_linux_x64.zip");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prefix_match_is_not_enough() {
        let release: GitHubRelease = serde_json::from_str(release_json()).unwrap();
        let mut wanted = spec(None);
        wanted.asset = "BepInEx_win_x64".into();
        assert!(release.find_asset(&wanted).is_err());
    }

    #[test]
    fn malformed_digests_are_ignored() {
        assert_eq!(parse_sha256_digest("md5:abc"), None);
        assert_eq!(parse_sha256_digest("sha256:xyz"), None);
        assert_eq!(parse_sha256_digest("nodigest"), None);
    }

    #[test]
    fn override_tag_only_when_given() {
        let pinned = spec(Some("v1")).with_tag(None);
        assert_eq!(pinned.display_tag(), "v1");
        let repinned = spec(None).with_tag(Some("v2".into()));
        assert_eq!(repinned.display_tag(), "v2");
    }
}
