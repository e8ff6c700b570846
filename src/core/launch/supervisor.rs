// ─── Process Supervisor ───
// Runs the server headless and decides how the run went from its stdout.
// The child is always killed before returning.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelSignal;
use crate::core::error::{ProvisionError, ProvisionResult};

use super::processes::elevated_command;

const KILL_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRunOutcome {
    HeartbeatObserved,
    /// Matched the crash pattern, or exited before any heartbeat.
    ExpectedCrashObserved,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedRun {
    pub outcome: ProcessRunOutcome,
    /// `false` when the server ran elevated and the outcome is assumed.
    pub output_captured: bool,
    pub lines_seen: usize,
    pub exit_status: Option<i32>,
}

/// One supervised launch.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub heartbeat_marker: String,
    pub expected_crash_pattern: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    elevated_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(elevated_grace: Duration) -> Self {
        Self { elevated_grace }
    }

    /// Launch and classify. `elevated` selects the blind path where output
    /// cannot be read.
    #[instrument(skip_all, fields(program = ?spec.program, elevated = elevated))]
    pub async fn run_supervised(
        &self,
        spec: &RunSpec,
        elevated: bool,
        cancel: &CancelSignal,
    ) -> ProvisionResult<SupervisedRun> {
        cancel.check()?;
        if elevated {
            return self.run_blind(spec, cancel).await;
        }
        run_captured(spec, cancel).await
    }

    async fn run_blind(&self, spec: &RunSpec, cancel: &CancelSignal) -> ProvisionResult<SupervisedRun> {
        let mut cmd = elevated_command(&spec.program, &spec.args, &spec.work_dir);
        cmd.kill_on_drop(true);
        debug!("Command: {}", format_command_for_logs(cmd.as_std()));

        let mut child = cmd.spawn().map_err(|source| ProvisionError::ProcessSpawn {
            program: spec.program.clone(),
            source,
        })?;

        warn!(
            "Server requires elevation; its output cannot be observed. Waiting {:?} and assuming the run succeeded",
            self.elevated_grace
        );

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => ProcessRunOutcome::Cancelled,
            _ = tokio::time::sleep(self.elevated_grace) => {
                if spec.expected_crash_pattern.is_some() {
                    ProcessRunOutcome::ExpectedCrashObserved
                } else {
                    ProcessRunOutcome::HeartbeatObserved
                }
            }
        };

        let exit_status = terminate(&mut child).await;
        // The elevated server is not our child; reach it by name.
        #[cfg(target_os = "windows")]
        {
            if let Some(name) = spec.program.file_name() {
                super::processes::kill_stale_processes(&[name.to_string_lossy().to_string()]);
            }
        }

        Ok(SupervisedRun {
            outcome,
            output_captured: false,
            lines_seen: 0,
            exit_status,
        })
    }
}

async fn run_captured(spec: &RunSpec, cancel: &CancelSignal) -> ProvisionResult<SupervisedRun> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    configure_platform_spawn(&mut cmd);

    info!("Launching {:?}", spec.program);
    debug!("Command: {}", format_command_for_logs(cmd.as_std()));

    let mut child = cmd.spawn().map_err(|source| ProvisionError::ProcessSpawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            terminate(&mut child).await;
            return Err(ProvisionError::ProcessSpawn {
                program: spec.program.clone(),
                source: std::io::Error::other("stdout was not captured"),
            });
        }
    };

    let lines_seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&lines_seen);
    let marker = spec.heartbeat_marker.clone();
    let crash_pattern = spec.expected_crash_pattern.clone();

    let mut reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    debug!("[server] {}", line);
                    if let Some(outcome) = classify_line(&line, &marker, crash_pattern.as_deref()) {
                        return outcome;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("Stopped reading server output: {}", err);
                    break;
                }
            }
        }
        ProcessRunOutcome::ExpectedCrashObserved
    });

    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => ProcessRunOutcome::Cancelled,
        joined = &mut reader => joined.unwrap_or_else(|err| {
            warn!("Output reader failed: {}", err);
            ProcessRunOutcome::ExpectedCrashObserved
        }),
        _ = tokio::time::sleep(spec.timeout) => ProcessRunOutcome::TimedOut,
    };

    reader.abort();
    let exit_status = terminate(&mut child).await;
    let lines_seen = lines_seen.load(Ordering::Relaxed);

    info!(
        "Supervised run finished: {:?} after {} lines (exit {:?})",
        outcome, lines_seen, exit_status
    );
    Ok(SupervisedRun {
        outcome,
        output_captured: true,
        lines_seen,
        exit_status,
    })
}

/// Heartbeat wins over the crash pattern when a line carries both.
pub fn classify_line(
    line: &str,
    heartbeat_marker: &str,
    expected_crash_pattern: Option<&str>,
) -> Option<ProcessRunOutcome> {
    if !heartbeat_marker.is_empty() && line.contains(heartbeat_marker) {
        return Some(ProcessRunOutcome::HeartbeatObserved);
    }
    match expected_crash_pattern {
        Some(pattern) if !pattern.is_empty() && line.contains(pattern) => {
            Some(ProcessRunOutcome::ExpectedCrashObserved)
        }
        _ => None,
    }
}

/// Kill if still running and reap. Returns the exit code when known.
async fn terminate(child: &mut Child) -> Option<i32> {
    if let Ok(Some(status)) = child.try_wait() {
        return status.code();
    }

    if let Err(err) = child.start_kill() {
        warn!("Could not kill child process: {}", err);
    }
    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(err)) => {
            warn!("Waiting for killed child failed: {}", err);
            None
        }
        Err(_) => {
            warn!("Child did not exit within {:?} of being killed", KILL_WAIT);
            None
        }
    }
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

pub(crate) fn format_command_for_logs(cmd: &std::process::Command) -> String {
    let program = shell_escape(&cmd.get_program().to_string_lossy());
    let args = cmd
        .get_args()
        .map(|arg| shell_escape(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");

    if args.is_empty() {
        program
    } else {
        format!("{} {}", program, args)
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '\\' | '=')
    }) {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}

/// Resolve the server executable under `server_dir`.
pub fn server_program(server_dir: &Path, executable: &str) -> PathBuf {
    server_dir.join(executable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_and_crash_lines_are_classified() {
        let crash = Some("NullReferenceException");
        assert_eq!(
            classify_line("[INFO] Heartbeat sent!", "Heartbeat sent!", crash),
            Some(ProcessRunOutcome::HeartbeatObserved)
        );
        assert_eq!(
            classify_line("NullReferenceException: Object reference", "Heartbeat sent!", crash),
            Some(ProcessRunOutcome::ExpectedCrashObserved)
        );
        assert_eq!(classify_line("Loading...", "Heartbeat sent!", crash), None);
        assert_eq!(classify_line("NullReferenceException", "Heartbeat sent!", None), None);
    }

    #[test]
    fn command_formatting_quotes_spaces() {
        let mut cmd = std::process::Command::new("/srv/TABG Server/TABG.exe");
        cmd.args(["-batchmode", "-nographics"]);
        assert_eq!(
            format_command_for_logs(&cmd),
            "\"/srv/TABG Server/TABG.exe\" -batchmode -nographics"
        );
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::core::cancel::{cancel_pair, CancelSignal};

        fn sh(script: &str, timeout: Duration, crash: Option<&str>) -> RunSpec {
            RunSpec {
                program: PathBuf::from("/bin/sh"),
                args: vec!["-c".into(), script.into()],
                work_dir: std::env::temp_dir(),
                heartbeat_marker: "Heartbeat sent!".into(),
                expected_crash_pattern: crash.map(String::from),
                timeout,
            }
        }

        fn supervisor() -> ProcessSupervisor {
            ProcessSupervisor::new(Duration::from_millis(50))
        }

        #[tokio::test]
        async fn heartbeat_completes_the_run_and_kills_the_server() {
            let spec = sh(
                "echo Loading...; echo 'Heartbeat sent!'; echo Ready; exec sleep 30",
                Duration::from_secs(120),
                None,
            );
            let started = std::time::Instant::now();
            let run = supervisor()
                .run_supervised(&spec, false, &CancelSignal::never())
                .await
                .unwrap();

            assert_eq!(run.outcome, ProcessRunOutcome::HeartbeatObserved);
            assert!(run.output_captured);
            assert!(run.lines_seen >= 2);
            assert!(started.elapsed() < Duration::from_secs(20));
        }

        #[tokio::test]
        async fn exit_without_heartbeat_is_the_crash_path() {
            let spec = sh("echo Loading...; exit 3", Duration::from_secs(30), None);
            let run = supervisor()
                .run_supervised(&spec, false, &CancelSignal::never())
                .await
                .unwrap();

            assert_eq!(run.outcome, ProcessRunOutcome::ExpectedCrashObserved);
            assert_eq!(run.lines_seen, 1);
        }

        #[tokio::test]
        async fn crash_pattern_is_matched() {
            let spec = sh(
                "echo 'NullReferenceException: boom'; exec sleep 30",
                Duration::from_secs(30),
                Some("NullReferenceException"),
            );
            let run = supervisor()
                .run_supervised(&spec, false, &CancelSignal::never())
                .await
                .unwrap();
            assert_eq!(run.outcome, ProcessRunOutcome::ExpectedCrashObserved);
        }

        #[tokio::test]
        async fn silent_server_times_out() {
            let spec = sh("exec sleep 30", Duration::from_millis(200), None);
            let run = supervisor()
                .run_supervised(&spec, false, &CancelSignal::never())
                .await
                .unwrap();
            assert_eq!(run.outcome, ProcessRunOutcome::TimedOut);
        }

        #[tokio::test]
        async fn cancellation_stops_the_run() {
            let (handle, signal) = cancel_pair();
            let spec = sh("exec sleep 30", Duration::from_secs(30), None);

            let canceller = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                handle.cancel();
            });
            let run = supervisor()
                .run_supervised(&spec, false, &signal)
                .await
                .unwrap();
            canceller.await.unwrap();

            assert_eq!(run.outcome, ProcessRunOutcome::Cancelled);
        }

        #[tokio::test]
        async fn missing_executable_is_a_spawn_error() {
            let spec = RunSpec {
                program: PathBuf::from("/definitely/not/here/TABG.exe"),
                ..sh("", Duration::from_secs(1), None)
            };
            let err = supervisor()
                .run_supervised(&spec, false, &CancelSignal::never())
                .await
                .unwrap_err();
            assert!(matches!(err, ProvisionError::ProcessSpawn { .. }));
        }

        #[tokio::test]
        async fn blind_run_reports_the_expected_outcome_without_output() {
            let spec = sh("exit 0", Duration::from_secs(30), Some("NullReferenceException"));
            let run = supervisor()
                .run_supervised(&spec, true, &CancelSignal::never())
                .await
                .unwrap();

            assert_eq!(run.outcome, ProcessRunOutcome::ExpectedCrashObserved);
            assert!(!run.output_captured);
            assert_eq!(run.lines_seen, 0);
        }
    }
}
