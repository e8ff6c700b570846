use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::downloader::ReleaseSpec;
use crate::core::error::{ProvisionError, ProvisionResult};

pub const APP_DIR_NAME: &str = "TabgProvisioner";
const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Tool-wide configuration persisted as `settings.json`.
///
/// Every field has a default so a partial file (or no file at all) works.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisionerSettings {
    /// Directory that must survive a reset (e.g. `TABG_Data`).
    pub core_data_dir: String,
    /// Always kept by reset, together with everything beneath it.
    pub presets_dir: String,
    /// Whitelist rules file, relative to the server root.
    pub whitelist_file: String,

    pub server_executable: String,
    pub first_run_args: Vec<String>,
    pub heartbeat_marker: String,
    pub expected_crash_pattern: Option<String>,
    pub first_run_timeout_secs: u64,
    /// Used only when the server output cannot be captured.
    pub elevated_grace_secs: u64,

    pub mod_loader: ReleaseSpec,
    pub plugin: ReleaseSpec,
    /// Proxy library name inside the mod-loader archive.
    pub proxy_library: String,
    /// Root-level names the proxy library is copied to.
    pub proxy_aliases: Vec<String>,
    pub plugin_dir: String,

    /// Settings file seeded with name/password/description.
    pub base_settings_file: String,
    /// Config produced by the first run; target of sanitization.
    pub generated_config: String,

    pub stale_process_names: Vec<String>,
    /// Interactive editor launched between first run and sanitization.
    pub config_editor: Option<PathBuf>,

    pub download_dir: Option<PathBuf>,
    pub github_api_base: String,
    pub github_token: Option<String>,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            core_data_dir: "TABG_Data".into(),
            presets_dir: "Presets".into(),
            whitelist_file: "server_whitelist.txt".into(),
            server_executable: "TABG.exe".into(),
            first_run_args: vec!["-batchmode".into(), "-nographics".into()],
            heartbeat_marker: "Heartbeat sent!".into(),
            expected_crash_pattern: Some("NullReferenceException".into()),
            first_run_timeout_secs: 120,
            elevated_grace_secs: 45,
            mod_loader: ReleaseSpec {
                owner: "BepInEx".into(),
                repo: "BepInEx".into(),
                asset: "BepInEx_win_x64_5.4.23.2.zip".into(),
                tag: None,
            },
            plugin: ReleaseSpec {
                owner: "tabg-community".into(),
                repo: "tabg-server-plugin".into(),
                asset: "TabgServerPlugin.zip".into(),
                tag: None,
            },
            proxy_library: "winhttp.dll".into(),
            proxy_aliases: vec!["winhttp.dll".into(), "version.dll".into()],
            plugin_dir: "BepInEx/plugins".into(),
            base_settings_file: "game_settings.txt".into(),
            generated_config: "plugin_settings.txt".into(),
            stale_process_names: vec!["TABG.exe".into(), "TABG".into()],
            config_editor: None,
            download_dir: None,
            github_api_base: DEFAULT_GITHUB_API.into(),
            github_token: None,
        }
    }
}

impl ProvisionerSettings {
    /// Load from `path`, falling back to defaults when the file is absent.
    ///
    /// A file that exists but cannot be parsed is rejected rather than
    /// silently replaced.
    pub fn load(path: &Path) -> ProvisionResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ProvisionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|e| {
            ProvisionError::Validation(format!("Corrupt settings file {:?}: {}", path, e))
        })
    }

    pub fn save(&self, path: &Path) -> ProvisionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ProvisionError::io(parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(ProvisionError::io(path))?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn first_run_timeout(&self) -> Duration {
        Duration::from_secs(self.first_run_timeout_secs)
    }

    pub fn elevated_grace(&self) -> Duration {
        Duration::from_secs(self.elevated_grace_secs)
    }

    /// Where downloaded archives are staged.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| default_base_dir(dirs::cache_dir()).join("downloads"))
    }
}

/// `<config dir>/TabgProvisioner/settings.json`.
pub fn default_settings_path() -> PathBuf {
    default_base_dir(dirs::config_dir()).join(SETTINGS_FILE)
}

fn default_base_dir(platform_dir: Option<PathBuf>) -> PathBuf {
    platform_dir
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ProvisionerSettings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, ProvisionerSettings::default());
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "heartbeat_marker": "Ready!", "first_run_timeout_secs": 5 }"#,
        )
        .unwrap();

        let settings = ProvisionerSettings::load(&path).unwrap();
        assert_eq!(settings.heartbeat_marker, "Ready!");
        assert_eq!(settings.first_run_timeout(), Duration::from_secs(5));
        assert_eq!(settings.core_data_dir, "TABG_Data");
    }

    #[test]
    fn corrupt_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ProvisionerSettings::load(&path).unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = ProvisionerSettings {
            config_editor: Some(PathBuf::from("/opt/editor")),
            ..ProvisionerSettings::default()
        };

        settings.save(&path).unwrap();
        assert_eq!(ProvisionerSettings::load(&path).unwrap(), settings);
    }
}
