use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::core::error::{ProvisionError, ProvisionResult};

use super::archive::extract_zip_overwrite;
use super::context::InstallContext;
use super::installer::{is_zip, ArchiveSource, ComponentInstaller, InstallReceipt};

/// Drops the server plugin into the server.
///
/// Zip archives mirror the server layout and are unpacked over the root;
/// any other file is copied into the loader's plugin directory.
pub struct PluginInstaller {
    archive: ArchiveSource,
}

impl PluginInstaller {
    pub fn new(archive: ArchiveSource) -> Self {
        Self { archive }
    }
}

pub fn deploy_plugin(
    artifact: &Path,
    server_dir: &Path,
    plugin_dir: &Path,
) -> ProvisionResult<Vec<PathBuf>> {
    if is_zip(artifact) {
        return Ok(extract_zip_overwrite(artifact, server_dir)?.files);
    }

    std::fs::create_dir_all(plugin_dir).map_err(ProvisionError::io(plugin_dir))?;

    let name = artifact.file_name().ok_or_else(|| {
        ProvisionError::Validation(format!("Plugin artifact {:?} has no file name", artifact))
    })?;
    let target = plugin_dir.join(name);
    std::fs::copy(artifact, &target).map_err(ProvisionError::io(&target))?;
    Ok(vec![target])
}

#[async_trait]
impl ComponentInstaller for PluginInstaller {
    fn component(&self) -> &'static str {
        "plugin"
    }

    async fn install(&self, ctx: &InstallContext<'_>) -> ProvisionResult<InstallReceipt> {
        let archive = self.archive.locate(ctx).await?;
        ctx.cancel.check()?;

        let server_dir = ctx.server_dir.to_path_buf();
        let plugin_dir = server_dir.join(&ctx.settings.plugin_dir);
        let artifact = archive.clone();
        let files_written =
            tokio::task::spawn_blocking(move || deploy_plugin(&artifact, &server_dir, &plugin_dir))
                .await
                .map_err(|e| ProvisionError::Extraction(format!("Plugin task failed: {e}")))??;

        info!("Plugin deployed: {} files", files_written.len());
        Ok(InstallReceipt {
            component: self.component(),
            archive,
            files_written,
        })
    }
}
