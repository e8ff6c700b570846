// ─── Host Processes ───
// Stale server cleanup and the elevation probe for install locations the
// current user cannot write to.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Kill every running process whose name matches one of `names`
/// (case-insensitive, `.exe` optional). Best-effort: returns how many
/// processes were signalled; failures are logged.
pub fn kill_stale_processes(names: &[String]) -> usize {
    if names.is_empty() {
        return 0;
    }

    let mut system = sysinfo::System::new_all();
    system.refresh_all();

    let own_pid = std::process::id();
    let mut killed = 0;
    for (pid, process) in system.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let proc_name = process.name().to_string_lossy().to_string();
        if !name_matches(&proc_name, names) {
            continue;
        }

        if process.kill() {
            info!("Killed stale process {} (pid {})", proc_name, pid);
            killed += 1;
        } else {
            warn!("Could not kill stale process {} (pid {})", proc_name, pid);
        }
    }
    killed
}

fn name_matches(proc_name: &str, wanted: &[String]) -> bool {
    let proc_name = strip_exe(proc_name);
    wanted
        .iter()
        .any(|w| strip_exe(w.trim()).eq_ignore_ascii_case(proc_name))
}

fn strip_exe(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".exe") => {
            &name[..cut]
        }
        _ => name,
    }
}

/// Whether the server directory can only be written with elevated rights.
pub fn requires_elevation(dir: &Path) -> bool {
    if under_program_files(dir) {
        debug!("{:?} is under Program Files", dir);
        return true;
    }
    write_probe_denied(dir)
}

#[cfg(target_os = "windows")]
fn under_program_files(dir: &Path) -> bool {
    ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"]
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .map(std::path::PathBuf::from)
        .any(|root| {
            let root = root.to_string_lossy().to_ascii_lowercase();
            let dir = dir.to_string_lossy().to_ascii_lowercase();
            dir.starts_with(&root)
        })
}

#[cfg(not(target_os = "windows"))]
fn under_program_files(_dir: &Path) -> bool {
    false
}

fn write_probe_denied(dir: &Path) -> bool {
    let probe = dir.join(format!(".provisioner-probe-{}", Uuid::new_v4()));
    match std::fs::write(&probe, b"probe") {
        Ok(()) => {
            if let Err(err) = std::fs::remove_file(&probe) {
                warn!("Could not remove write probe {:?}: {}", probe, err);
            }
            false
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => true,
        Err(err) => {
            debug!("Write probe in {:?} failed: {}", dir, err);
            false
        }
    }
}

/// Command that launches `program` elevated without capturing its output.
#[cfg(target_os = "windows")]
pub fn elevated_command(program: &Path, args: &[String], work_dir: &Path) -> Command {
    let arg_list = if args.is_empty() {
        String::new()
    } else {
        let quoted = args.iter().map(|a| ps_quote(a)).collect::<Vec<_>>();
        format!(" -ArgumentList @({})", quoted.join(","))
    };
    let script = format!(
        "Start-Process -FilePath {} -WorkingDirectory {} -Verb RunAs{}",
        ps_quote(&program.display().to_string()),
        ps_quote(&work_dir.display().to_string()),
        arg_list
    );

    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-Command", &script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

/// Elsewhere there is no consent prompt; run detached from our pipes.
#[cfg(not(target_os = "windows"))]
pub fn elevated_command(program: &Path, args: &[String], work_dir: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    cmd
}

#[cfg(any(target_os = "windows", test))]
fn ps_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_names_match_with_or_without_exe() {
        let wanted = vec!["TABG.exe".to_string(), "TABG".to_string()];
        assert!(name_matches("TABG.exe", &wanted));
        assert!(name_matches("tabg", &wanted));
        assert!(name_matches("TABG.EXE", &["tabg".to_string()]));
        assert!(!name_matches("TABGLauncher.exe", &wanted));
        assert!(!name_matches("exe", &wanted));
    }

    #[test]
    fn killing_unknown_names_touches_nothing() {
        assert_eq!(kill_stale_processes(&[]), 0);
        assert_eq!(
            kill_stale_processes(&["no-such-process-9f2c1e7a".to_string()]),
            0
        );
    }

    #[test]
    fn writable_dir_needs_no_elevation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!requires_elevation(dir.path()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn powershell_quotes_are_doubled() {
        assert_eq!(ps_quote(r"C:\Games\TABG's Server"), r"'C:\Games\TABG''s Server'");
    }
}
