// ─── Install Orchestrator ───
// Drives the provisioning phases strictly in order over one server
// directory. Every phase boundary checks the shared cancellation signal;
// the first failing phase ends the run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::config::{BaseSettings, SanitizerRules};
use crate::core::downloader::AssetSource;
use crate::core::error::{ProvisionError, ProvisionResult};
use crate::core::launch::supervisor::server_program;
use crate::core::launch::{
    await_external_edit, kill_stale_processes, requires_elevation, EditorOutcome,
    ProcessRunOutcome, ProcessSupervisor, RunSpec, SupervisedRun,
};
use crate::core::loaders::{
    ArchiveSource, ComponentInstaller, DoorstopBootstrapper, InstallContext, InstallReceipt,
    PluginInstaller,
};
use crate::core::state::ProvisionerSettings;
use crate::core::whitelist::{DeletionReport, ResetEngine, RuleSet};

/// One invocation's inputs. Not modified once the run starts.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub server_dir: PathBuf,
    pub base: BaseSettings,
    /// Mod-loader release tag; `None` keeps the configured one.
    pub doorstop_tag: Option<String>,
    pub plugin_tag: Option<String>,
    /// Stop after the loader is bootstrapped.
    pub skip_plugin: bool,
    pub skip_editor: bool,
    pub cancel: CancelSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    KillStaleProcesses,
    WriteBaseSettings,
    HardReset,
    BootstrapDoorstop,
    FetchAssets,
    FirstRunForConfigGeneration,
    AwaitExternalUserEdit,
    Sanitize,
    Done,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::KillStaleProcesses => "KillStaleProcesses",
            Phase::WriteBaseSettings => "WriteBaseSettings",
            Phase::HardReset => "HardReset",
            Phase::BootstrapDoorstop => "BootstrapDoorstop",
            Phase::FetchAssets => "FetchAssets",
            Phase::FirstRunForConfigGeneration => "FirstRunForConfigGeneration",
            Phase::AwaitExternalUserEdit => "AwaitExternalUserEdit",
            Phase::Sanitize => "Sanitize",
            Phase::Done => "Done",
        }
    }

    /// Phases to execute, in order. The plugin sub-sequence is dropped when
    /// `skip_plugin` is set.
    pub fn sequence(skip_plugin: bool) -> Vec<Phase> {
        let mut phases = vec![
            Phase::Init,
            Phase::KillStaleProcesses,
            Phase::WriteBaseSettings,
            Phase::HardReset,
            Phase::BootstrapDoorstop,
        ];
        if !skip_plugin {
            phases.extend([
                Phase::FetchAssets,
                Phase::FirstRunForConfigGeneration,
                Phase::AwaitExternalUserEdit,
                Phase::Sanitize,
            ]);
        }
        phases
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What each phase produced, for the final report.
#[derive(Debug, Clone, Default)]
pub struct InstallSummary {
    pub stale_killed: usize,
    pub deletion: Option<DeletionReport>,
    pub doorstop: Option<InstallReceipt>,
    pub plugin: Option<InstallReceipt>,
    pub first_run: Option<SupervisedRun>,
    pub editor: Option<EditorOutcome>,
    pub sanitized: Option<bool>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Done(InstallSummary),
    Failed { phase: Phase, error: ProvisionError },
    Cancelled { phase: Phase },
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Done(_) => 0,
            RunOutcome::Cancelled { .. } => 1,
            RunOutcome::Failed { .. } => 2,
        }
    }

    /// Wrap a single-phase result with the same exit-code contract.
    pub fn from_phase<T>(phase: Phase, result: ProvisionResult<T>) -> Self {
        match result {
            Ok(_) => RunOutcome::Done(InstallSummary::default()),
            Err(err) if err.is_cancelled() => RunOutcome::Cancelled { phase },
            Err(err) => RunOutcome::Failed {
                phase,
                error: err.in_phase(phase.name()),
            },
        }
    }
}

pub struct InstallOrchestrator {
    settings: ProvisionerSettings,
    source: Arc<dyn AssetSource>,
    supervisor: ProcessSupervisor,
}

impl InstallOrchestrator {
    pub fn new(settings: ProvisionerSettings, source: Arc<dyn AssetSource>) -> Self {
        let supervisor = ProcessSupervisor::new(settings.elevated_grace());
        Self {
            settings,
            source,
            supervisor,
        }
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Run every phase. Never panics on phase errors; the outcome carries
    /// the failing phase and its error.
    #[instrument(skip_all, fields(server_dir = ?request.server_dir))]
    pub async fn run(&self, request: &InstallRequest) -> RunOutcome {
        if let Err(err) = self.validate(request) {
            error!("Invalid install request: {}", err);
            return RunOutcome::Failed {
                phase: Phase::Init,
                error: err,
            };
        }

        let mut summary = InstallSummary::default();
        for phase in Phase::sequence(request.skip_plugin) {
            if request.cancel.is_cancelled() {
                info!("Cancelled before {}", phase);
                return RunOutcome::Cancelled { phase };
            }

            info!("Phase {} started", phase);
            match self.run_phase(phase, request, &mut summary).await {
                Ok(()) => info!("Phase {} finished", phase),
                Err(err) if err.is_cancelled() => {
                    info!("Cancelled during {}", phase);
                    return RunOutcome::Cancelled { phase };
                }
                Err(err) => {
                    let err = err.in_phase(phase.name());
                    error!("{}", err);
                    return RunOutcome::Failed { phase, error: err };
                }
            }
        }

        info!("Install finished for {:?}", request.server_dir);
        RunOutcome::Done(summary)
    }

    pub fn validate(&self, request: &InstallRequest) -> ProvisionResult<()> {
        if !request.server_dir.is_dir() {
            return Err(ProvisionError::Validation(format!(
                "Server directory {:?} does not exist",
                request.server_dir
            )));
        }
        request.base.validate()
    }

    async fn run_phase(
        &self,
        phase: Phase,
        request: &InstallRequest,
        summary: &mut InstallSummary,
    ) -> ProvisionResult<()> {
        match phase {
            Phase::Init => {
                let download_dir = self.settings.download_dir();
                tokio::fs::create_dir_all(&download_dir)
                    .await
                    .map_err(ProvisionError::io(&download_dir))?;
            }
            Phase::KillStaleProcesses => {
                summary.stale_killed = self.kill_stale().await;
            }
            Phase::WriteBaseSettings => {
                let path = request.server_dir.join(&self.settings.base_settings_file);
                request.base.write_to(&path)?;
            }
            Phase::HardReset => {
                summary.deletion = Some(self.hard_reset(&request.server_dir).await?);
            }
            Phase::BootstrapDoorstop => {
                summary.doorstop = Some(self.bootstrap(request).await?);
            }
            Phase::FetchAssets => {
                summary.plugin = Some(self.install_plugin(request).await?);
            }
            Phase::FirstRunForConfigGeneration => {
                let run = self.first_run(&request.server_dir, &request.cancel).await?;
                summary.first_run = Some(run);
            }
            Phase::AwaitExternalUserEdit => {
                summary.editor = Some(if request.skip_editor {
                    info!("Interactive edit skipped");
                    EditorOutcome::Skipped
                } else {
                    let target = self.generated_config_path(&request.server_dir);
                    await_external_edit(
                        self.settings.config_editor.as_deref(),
                        &target,
                        &request.cancel,
                    )
                    .await?
                });
            }
            Phase::Sanitize => {
                summary.sanitized = self.sanitize(&request.server_dir)?;
            }
            Phase::Done => {}
        }
        Ok(())
    }

    /// Best-effort: a failure to enumerate processes never fails the run.
    pub async fn kill_stale(&self) -> usize {
        let names = self.settings.stale_process_names.clone();
        match tokio::task::spawn_blocking(move || kill_stale_processes(&names)).await {
            Ok(killed) => killed,
            Err(err) => {
                warn!("Stale process cleanup did not complete: {}", err);
                0
            }
        }
    }

    pub async fn hard_reset(&self, server_dir: &Path) -> ProvisionResult<DeletionReport> {
        let engine = ResetEngine::new(server_dir, &self.settings);
        let required = RuleSet::required_entries(&self.settings);
        let report =
            tokio::task::spawn_blocking(move || engine.reset_with_rules_file(&required))
                .await
                .map_err(|e| ProvisionError::Io {
                    path: server_dir.to_path_buf(),
                    source: std::io::Error::other(e),
                })??;

        if !report.failed.is_empty() {
            warn!("{} entries could not be deleted", report.failed.len());
        }
        Ok(report)
    }

    pub async fn bootstrap(&self, request: &InstallRequest) -> ProvisionResult<InstallReceipt> {
        let spec = self
            .settings
            .mod_loader
            .clone()
            .with_tag(request.doorstop_tag.clone());
        self.bootstrap_from(&request.server_dir, ArchiveSource::Release(spec), &request.cancel)
            .await
    }

    pub async fn bootstrap_from(
        &self,
        server_dir: &Path,
        archive: ArchiveSource,
        cancel: &CancelSignal,
    ) -> ProvisionResult<InstallReceipt> {
        let download_dir = self.settings.download_dir();
        let ctx = self.context(server_dir, &download_dir, cancel);
        DoorstopBootstrapper::new(archive).install(&ctx).await
    }

    async fn install_plugin(&self, request: &InstallRequest) -> ProvisionResult<InstallReceipt> {
        let spec = self
            .settings
            .plugin
            .clone()
            .with_tag(request.plugin_tag.clone());
        let download_dir = self.settings.download_dir();
        let ctx = self.context(&request.server_dir, &download_dir, &request.cancel);
        PluginInstaller::new(ArchiveSource::Release(spec))
            .install(&ctx)
            .await
    }

    /// Launch the server once so it writes its config. A timeout is only
    /// a warning; the generated file is checked afterwards.
    pub async fn first_run(
        &self,
        server_dir: &Path,
        cancel: &CancelSignal,
    ) -> ProvisionResult<SupervisedRun> {
        let spec = RunSpec {
            program: server_program(server_dir, &self.settings.server_executable),
            args: self.settings.first_run_args.clone(),
            work_dir: server_dir.to_path_buf(),
            heartbeat_marker: self.settings.heartbeat_marker.clone(),
            expected_crash_pattern: self.settings.expected_crash_pattern.clone(),
            timeout: self.settings.first_run_timeout(),
        };

        let elevated = requires_elevation(server_dir);
        let run = self.supervisor.run_supervised(&spec, elevated, cancel).await?;
        match run.outcome {
            ProcessRunOutcome::Cancelled => return Err(ProvisionError::Cancelled),
            ProcessRunOutcome::TimedOut => warn!(
                "First run timed out after {:?}; continuing",
                spec.timeout
            ),
            ProcessRunOutcome::HeartbeatObserved | ProcessRunOutcome::ExpectedCrashObserved => {
                info!("First run ended with {:?}", run.outcome)
            }
        }

        let generated = self.generated_config_path(server_dir);
        if !generated.is_file() {
            warn!("First run did not produce {:?}", generated);
        }
        Ok(run)
    }

    /// `None` when there was no generated config to sanitize.
    pub fn sanitize(&self, server_dir: &Path) -> ProvisionResult<Option<bool>> {
        let path = self.generated_config_path(server_dir);
        if !path.is_file() {
            warn!("Nothing to sanitize: {:?} is missing", path);
            return Ok(None);
        }
        SanitizerRules::default().sanitize_file(&path).map(Some)
    }

    fn generated_config_path(&self, server_dir: &Path) -> PathBuf {
        server_dir.join(&self.settings.generated_config)
    }

    fn context<'a>(
        &'a self,
        server_dir: &'a Path,
        download_dir: &'a Path,
        cancel: &'a CancelSignal,
    ) -> InstallContext<'a> {
        InstallContext {
            server_dir,
            download_dir,
            source: self.source.as_ref(),
            settings: &self.settings,
            cancel,
        }
    }
}
