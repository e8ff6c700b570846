// ─── CLI Commands ───
// Subcommands map onto either the full pipeline or a single phase. Every
// command resolves to a `RunOutcome`, so exit codes are shared.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::core::cancel::CancelSignal;
use crate::core::config::{BaseSettings, SanitizerRules};
use crate::core::downloader::GitHubAssetSource;
use crate::core::error::{ProvisionError, ProvisionResult};
use crate::core::loaders::ArchiveSource;
use crate::core::orchestrator::{InstallOrchestrator, InstallRequest, Phase, RunOutcome};
use crate::core::state::{default_settings_path, ProvisionerSettings};

#[derive(Debug, Parser)]
#[command(name = "tabg-provisioner")]
#[command(version, about = "Provision and repair a TABG dedicated server", long_about = None)]
pub struct Cli {
    /// Settings file (default: per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the whole provisioning pipeline
    Install {
        /// Server installation directory
        server_dir: PathBuf,

        /// Server name written to the base settings
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Mod-loader release tag (default: configured or latest)
        #[arg(long)]
        doorstop_tag: Option<String>,

        /// Plugin release tag (default: configured or latest)
        #[arg(long)]
        plugin_tag: Option<String>,

        /// Stop after the mod-loader is bootstrapped
        #[arg(long)]
        skip_plugin: bool,

        /// Do not wait for the interactive config editor
        #[arg(long)]
        skip_editor: bool,
    },

    /// Delete everything the whitelist does not keep
    Reset {
        server_dir: PathBuf,
    },

    /// Install the mod-loader and rewrite its descriptor
    Bootstrap {
        server_dir: PathBuf,

        /// Release tag of the configured mod-loader repository
        #[arg(long)]
        tag: Option<String>,

        /// Use a local archive instead of downloading
        #[arg(long, conflicts_with_all = ["tag", "url"])]
        archive: Option<PathBuf>,

        /// Download the archive from a direct link
        #[arg(long, conflicts_with = "tag")]
        url: Option<String>,
    },

    /// Repair the generated config (a file, or a server directory)
    Sanitize {
        target: PathBuf,
    },

    /// Launch the server once so it writes its config
    FirstRun {
        server_dir: PathBuf,
    },
}

impl Commands {
    fn phase(&self) -> Phase {
        match self {
            Commands::Install { .. } => Phase::Init,
            Commands::Reset { .. } => Phase::HardReset,
            Commands::Bootstrap { .. } => Phase::BootstrapDoorstop,
            Commands::Sanitize { .. } => Phase::Sanitize,
            Commands::FirstRun { .. } => Phase::FirstRunForConfigGeneration,
        }
    }
}

fn load_settings(path: Option<&Path>) -> ProvisionResult<ProvisionerSettings> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_settings_path);
    info!("Using settings {:?}", path);
    ProvisionerSettings::load(&path)
}

fn require_dir(dir: &Path) -> ProvisionResult<()> {
    if dir.is_dir() {
        return Ok(());
    }
    Err(ProvisionError::Validation(format!(
        "Server directory {:?} does not exist",
        dir
    )))
}

/// Execute one parsed command line against a cancellation signal.
pub async fn execute(cli: Cli, cancel: CancelSignal) -> RunOutcome {
    let phase = cli.command.phase();
    let orchestrator = match build_orchestrator(cli.config.as_deref()) {
        Ok(orchestrator) => orchestrator,
        Err(err) => return RunOutcome::from_phase::<()>(phase, Err(err)),
    };

    match cli.command {
        Commands::Install {
            server_dir,
            name,
            password,
            description,
            doorstop_tag,
            plugin_tag,
            skip_plugin,
            skip_editor,
        } => {
            let request = InstallRequest {
                server_dir,
                base: BaseSettings {
                    name,
                    password,
                    description,
                },
                doorstop_tag,
                plugin_tag,
                skip_plugin,
                skip_editor,
                cancel,
            };
            orchestrator.run(&request).await
        }
        Commands::Reset { server_dir } => {
            let result = match require_dir(&server_dir) {
                Ok(()) => orchestrator.hard_reset(&server_dir).await,
                Err(err) => Err(err),
            };
            if let Ok(report) = &result {
                info!(
                    "Kept {} entries, deleted {}, {} failures",
                    report.kept,
                    report.deleted.len(),
                    report.failed.len()
                );
            }
            RunOutcome::from_phase(phase, result)
        }
        Commands::Bootstrap {
            server_dir,
            tag,
            archive,
            url,
        } => {
            let source = match (archive, url) {
                (Some(path), _) => ArchiveSource::Local(path),
                (None, Some(url)) => ArchiveSource::Url(url),
                (None, None) => ArchiveSource::Release(
                    orchestrator.settings().mod_loader.clone().with_tag(tag),
                ),
            };
            let result = match require_dir(&server_dir) {
                Ok(()) => {
                    orchestrator
                        .bootstrap_from(&server_dir, source, &cancel)
                        .await
                }
                Err(err) => Err(err),
            };
            RunOutcome::from_phase(phase, result)
        }
        Commands::Sanitize { target } => {
            let result = if target.is_dir() {
                orchestrator.sanitize(&target)
            } else {
                SanitizerRules::default().sanitize_file(&target).map(Some)
            };
            if let Ok(Some(false)) = result {
                info!("Config already clean");
            }
            RunOutcome::from_phase(phase, result)
        }
        Commands::FirstRun { server_dir } => {
            let result = match require_dir(&server_dir) {
                Ok(()) => orchestrator.first_run(&server_dir, &cancel).await,
                Err(err) => Err(err),
            };
            if let Ok(run) = &result {
                if !run.output_captured {
                    warn!("Outcome {:?} was assumed, not observed", run.outcome);
                }
            }
            RunOutcome::from_phase(phase, result)
        }
    }
}

fn build_orchestrator(config: Option<&Path>) -> ProvisionResult<InstallOrchestrator> {
    let settings = load_settings(config)?;
    let source = GitHubAssetSource::from_settings(&settings)?;
    Ok(InstallOrchestrator::new(settings, Arc::new(source)))
}
