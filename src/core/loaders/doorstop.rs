// ─── Doorstop Bootstrapper ───
// Installs the BepInEx loader: extract the archive over the server root,
// copy the proxy library to the names the game will load, and rewrite the
// doorstop descriptor so the loader is enabled.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::core::error::{ProvisionError, ProvisionResult};

use super::archive::extract_zip_overwrite;
use super::context::InstallContext;
use super::installer::{ArchiveSource, ComponentInstaller, InstallReceipt};

pub const DESCRIPTOR_FILE: &str = "doorstop_config.ini";
const DESCRIPTOR_SECTION: &str = "[UnityDoorstop]";
const PRELOADER_ASSEMBLY: &str = r"BepInEx\core\BepInEx.Preloader.dll";

/// Contents of `doorstop_config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorstopDescriptor {
    pub enabled: bool,
    pub target_assembly: String,
    pub redirect_output_log: bool,
    pub ignore_disable_switch: bool,
    pub dll_search_path_override: String,
}

impl Default for DoorstopDescriptor {
    fn default() -> Self {
        Self {
            enabled: true,
            target_assembly: PRELOADER_ASSEMBLY.into(),
            redirect_output_log: false,
            ignore_disable_switch: false,
            dll_search_path_override: String::new(),
        }
    }
}

impl DoorstopDescriptor {
    pub fn render(&self) -> String {
        format!(
            "{DESCRIPTOR_SECTION}\n\
             enabled={}\n\
             targetAssembly={}\n\
             redirectOutputLog={}\n\
             ignoreDisableSwitch={}\n\
             dllSearchPathOverride={}\n",
            self.enabled,
            self.target_assembly,
            self.redirect_output_log,
            self.ignore_disable_switch,
            self.dll_search_path_override,
        )
    }

    /// Lenient reader; unknown or malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut descriptor = Self {
            enabled: false,
            ..Self::default()
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "enabled" => descriptor.enabled = value.eq_ignore_ascii_case("true"),
                "targetAssembly" => descriptor.target_assembly = value.to_string(),
                "redirectOutputLog" => {
                    descriptor.redirect_output_log = value.eq_ignore_ascii_case("true")
                }
                "ignoreDisableSwitch" => {
                    descriptor.ignore_disable_switch = value.eq_ignore_ascii_case("true")
                }
                "dllSearchPathOverride" => descriptor.dll_search_path_override = value.to_string(),
                _ => {}
            }
        }
        descriptor
    }

    /// Replace whatever is at `path` with the rendered descriptor.
    pub fn write(&self, path: &Path) -> ProvisionResult<()> {
        std::fs::write(path, self.render()).map_err(ProvisionError::io(path))
    }
}

#[derive(Debug, Clone)]
pub struct DoorstopBootstrapper {
    archive: ArchiveSource,
    descriptor: DoorstopDescriptor,
}

impl DoorstopBootstrapper {
    pub fn new(archive: ArchiveSource) -> Self {
        Self {
            archive,
            descriptor: DoorstopDescriptor::default(),
        }
    }

    /// Extract, alias the proxy, write the descriptor. Blocking.
    pub fn apply(
        &self,
        archive: &Path,
        server_dir: &Path,
        proxy_library: &str,
        proxy_aliases: &[String],
    ) -> ProvisionResult<Vec<PathBuf>> {
        let summary = extract_zip_overwrite(archive, server_dir)?;
        let mut written = summary.files;

        let proxy = locate_proxy(server_dir, proxy_library).ok_or_else(|| {
            ProvisionError::Extraction(format!(
                "{:?} does not contain the proxy library {}",
                archive, proxy_library
            ))
        })?;
        written.extend(copy_proxy_aliases(&proxy, server_dir, proxy_aliases)?);

        let descriptor_path = server_dir.join(DESCRIPTOR_FILE);
        self.descriptor.write(&descriptor_path)?;
        written.push(descriptor_path);

        Ok(written)
    }
}

#[async_trait]
impl ComponentInstaller for DoorstopBootstrapper {
    fn component(&self) -> &'static str {
        "doorstop"
    }

    #[instrument(name = "bootstrap_doorstop", skip_all, fields(server_dir = ?ctx.server_dir))]
    async fn install(&self, ctx: &InstallContext<'_>) -> ProvisionResult<InstallReceipt> {
        let archive = self.archive.locate(ctx).await?;
        ctx.cancel.check()?;

        let this = self.clone();
        let server_dir = ctx.server_dir.to_path_buf();
        let proxy_library = ctx.settings.proxy_library.clone();
        let aliases = ctx.settings.proxy_aliases.clone();
        let archive_path = archive.clone();

        let files_written = tokio::task::spawn_blocking(move || {
            this.apply(&archive_path, &server_dir, &proxy_library, &aliases)
        })
        .await
        .map_err(|e| ProvisionError::Extraction(format!("Extraction task failed: {e}")))??;

        info!(
            "Doorstop bootstrapped from {:?} ({} files)",
            archive,
            files_written.len()
        );
        Ok(InstallReceipt {
            component: self.component(),
            archive,
            files_written,
        })
    }
}

/// Prefer the 64-bit build, then the archive root.
fn locate_proxy(server_dir: &Path, proxy_library: &str) -> Option<PathBuf> {
    ["x64", "x86", ""]
        .iter()
        .map(|sub| {
            if sub.is_empty() {
                server_dir.join(proxy_library)
            } else {
                server_dir.join(sub).join(proxy_library)
            }
        })
        .find(|candidate| candidate.is_file())
}

fn copy_proxy_aliases(
    proxy: &Path,
    server_dir: &Path,
    aliases: &[String],
) -> ProvisionResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for alias in aliases {
        let target = server_dir.join(alias);
        // Copying a file onto itself truncates it.
        if target == proxy {
            written.push(target);
            continue;
        }
        std::fs::copy(proxy, &target).map_err(ProvisionError::io(&target))?;
        written.push(target);
    }
    if written.is_empty() {
        warn!("No proxy aliases configured; the loader will not be injected");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::archive::write_test_zip;

    fn aliases() -> Vec<String> {
        vec!["winhttp.dll".into(), "version.dll".into()]
    }

    fn loader_zip(dir: &Path) -> PathBuf {
        let path = dir.join("BepInEx_win_x64.zip");
        write_test_zip(
            &path,
            &[
                ("winhttp.dll", b"proxy-bytes"),
                ("doorstop_config.ini", b"[UnityDoorstop]\nenabled=false\n"),
                ("BepInEx/core/BepInEx.Preloader.dll", b"preloader"),
            ],
        );
        path
    }

    #[test]
    fn descriptor_renders_all_keys() {
        let text = DoorstopDescriptor::default().render();
        assert_eq!(
            text,
            "[UnityDoorstop]\n\
             enabled=true\n\
             targetAssembly=BepInEx\\core\\BepInEx.Preloader.dll\n\
             redirectOutputLog=false\n\
             ignoreDisableSwitch=false\n\
             dllSearchPathOverride=\n"
        );
        assert_eq!(DoorstopDescriptor::parse(&text), DoorstopDescriptor::default());
    }

    #[test]
    fn bootstrap_enables_loader_and_aliases_proxy() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        std::fs::create_dir_all(&server).unwrap();
        std::fs::write(server.join(DESCRIPTOR_FILE), "garbage\x00\x01 not ini").unwrap();
        let archive = loader_zip(dir.path());

        let bootstrapper = DoorstopBootstrapper::new(ArchiveSource::Local(archive.clone()));
        bootstrapper
            .apply(&archive, &server, "winhttp.dll", &aliases())
            .unwrap();

        let descriptor =
            DoorstopDescriptor::parse(&std::fs::read_to_string(server.join(DESCRIPTOR_FILE)).unwrap());
        assert!(descriptor.enabled);
        assert_eq!(std::fs::read(server.join("winhttp.dll")).unwrap(), b"proxy-bytes");
        assert_eq!(std::fs::read(server.join("version.dll")).unwrap(), b"proxy-bytes");
        assert!(server.join("BepInEx/core/BepInEx.Preloader.dll").is_file());
    }

    #[test]
    fn second_bootstrap_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        let archive = loader_zip(dir.path());
        let bootstrapper = DoorstopBootstrapper::new(ArchiveSource::Local(archive.clone()));

        bootstrapper
            .apply(&archive, &server, "winhttp.dll", &aliases())
            .unwrap();
        let first = std::fs::read(server.join(DESCRIPTOR_FILE)).unwrap();
        let first_proxy = std::fs::read(server.join("version.dll")).unwrap();

        bootstrapper
            .apply(&archive, &server, "winhttp.dll", &aliases())
            .unwrap();
        assert_eq!(std::fs::read(server.join(DESCRIPTOR_FILE)).unwrap(), first);
        assert_eq!(std::fs::read(server.join("version.dll")).unwrap(), first_proxy);
    }

    #[test]
    fn architecture_folder_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        let archive = dir.path().join("multi.zip");
        write_test_zip(
            &archive,
            &[("x64/winhttp.dll", b"x64"), ("x86/winhttp.dll", b"x86")],
        );

        DoorstopBootstrapper::new(ArchiveSource::Local(archive.clone()))
            .apply(&archive, &server, "winhttp.dll", &aliases())
            .unwrap();
        assert_eq!(std::fs::read(server.join("winhttp.dll")).unwrap(), b"x64");
        assert_eq!(std::fs::read(server.join("version.dll")).unwrap(), b"x64");
    }

    #[test]
    fn missing_proxy_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        write_test_zip(&archive, &[("readme.txt", b"hi")]);

        let err = DoorstopBootstrapper::new(ArchiveSource::Local(archive.clone()))
            .apply(&archive, &dir.path().join("server"), "winhttp.dll", &aliases())
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Extraction(_)));
    }
}
