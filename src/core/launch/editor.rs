use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::core::cancel::CancelSignal;
use crate::core::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorOutcome {
    /// No editor configured.
    Skipped,
    Closed { exit_code: Option<i32> },
}

/// Open `target` in the configured editor and wait for it to close.
///
/// No timeout: the user decides when they are done. Cancellation kills
/// the editor.
pub async fn await_external_edit(
    editor: Option<&Path>,
    target: &Path,
    cancel: &CancelSignal,
) -> ProvisionResult<EditorOutcome> {
    let Some(editor) = editor else {
        info!("No config editor configured, skipping interactive edit");
        return Ok(EditorOutcome::Skipped);
    };
    cancel.check()?;

    let mut cmd = Command::new(editor);
    cmd.arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    info!("Waiting for {:?} to close", editor);
    let mut child = cmd.spawn().map_err(|source| ProvisionError::ProcessSpawn {
        program: editor.to_path_buf(),
        source,
    })?;

    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            if let Err(err) = child.start_kill() {
                warn!("Could not close editor: {}", err);
            }
            let _ = child.wait().await;
            Err(ProvisionError::Cancelled)
        }
        status = child.wait() => {
            let status = status.map_err(ProvisionError::io(editor))?;
            info!("Editor closed with {}", status);
            Ok(EditorOutcome::Closed { exit_code: status.code() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_editor_is_skipped() {
        let outcome = await_external_edit(None, Path::new("x.txt"), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(outcome, EditorOutcome::Skipped);
    }

    #[tokio::test]
    async fn missing_editor_is_a_spawn_error() {
        let err = await_external_edit(
            Some(Path::new("/no/such/editor-binary")),
            Path::new("x.txt"),
            &CancelSignal::never(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::ProcessSpawn { .. }));
    }

    // `/bin/sh <target>` runs the target as a script, standing in for an
    // editor that acts on the file it was given.
    #[cfg(unix)]
    #[tokio::test]
    async fn waits_for_editor_exit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("edit.sh");
        std::fs::write(&target, "echo edited > marker.txt\nexit 0\n").unwrap();

        let outcome = await_external_edit(Some(Path::new("/bin/sh")), &target, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(outcome, EditorOutcome::Closed { exit_code: Some(0) });
        assert!(dir.path().join("marker.txt").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_closes_the_editor() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wait.sh");
        std::fs::write(&target, "exec sleep 30\n").unwrap();
        let (handle, signal) = crate::core::cancel::cancel_pair();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            handle.cancel();
        });
        let err = await_external_edit(Some(Path::new("/bin/sh")), &target, &signal)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
    }
}
