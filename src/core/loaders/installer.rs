use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::downloader::ReleaseSpec;
use crate::core::error::{ProvisionError, ProvisionResult};

use super::context::InstallContext;

/// Result of installing one component into the server directory.
#[derive(Debug, Clone)]
pub struct InstallReceipt {
    pub component: &'static str,
    pub archive: PathBuf,
    pub files_written: Vec<PathBuf>,
}

#[async_trait]
pub trait ComponentInstaller: Send + Sync {
    fn component(&self) -> &'static str;

    async fn install(&self, ctx: &InstallContext<'_>) -> ProvisionResult<InstallReceipt>;
}

/// Where a component archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    /// Already on disk.
    Local(PathBuf),
    /// Direct download link.
    Url(String),
    /// Named asset of a tagged release.
    Release(ReleaseSpec),
}

impl ArchiveSource {
    /// Produce a local path for the archive, downloading if needed.
    pub async fn locate(&self, ctx: &InstallContext<'_>) -> ProvisionResult<PathBuf> {
        match self {
            ArchiveSource::Local(path) => {
                if !path.is_file() {
                    return Err(ProvisionError::Validation(format!(
                        "Archive {:?} does not exist",
                        path
                    )));
                }
                Ok(path.clone())
            }
            ArchiveSource::Url(url) => {
                ctx.source
                    .fetch_url(url, ctx.download_dir, ctx.cancel)
                    .await
            }
            ArchiveSource::Release(spec) => {
                ctx.source.fetch(spec, ctx.download_dir, ctx.cancel).await
            }
        }
    }
}

pub(crate) fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}
