// ─── Config Sanitizer ───
// Structural repair of the generated `key=value` config so the server's
// parser accepts it. Values are never reinterpreted.

use std::path::Path;

use tracing::{debug, info};

use crate::core::error::{ProvisionError, ProvisionResult};

const COMMENT: &str = "//";

/// Which keys get special treatment.
#[derive(Debug, Clone)]
pub struct SanitizerRules {
    /// Empty value becomes `0`.
    pub numeric_keys: Vec<String>,
    /// Empty value comments the whole line out.
    pub comment_out_if_empty: Vec<String>,
    /// Non-empty value must end with the terminator.
    pub list_keys: Vec<(String, char)>,
}

impl Default for SanitizerRules {
    fn default() -> Self {
        Self {
            numeric_keys: vec!["KillsToWin".into(), "RoundsToWin".into(), "MaxPlayers".into()],
            comment_out_if_empty: vec!["RingSettings".into()],
            list_keys: vec![("Loadout".into(), ';')],
        }
    }
}

impl SanitizerRules {
    fn is_numeric(&self, key: &str) -> bool {
        self.numeric_keys.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    fn comments_out(&self, key: &str) -> bool {
        self.comment_out_if_empty
            .iter()
            .any(|k| k.eq_ignore_ascii_case(key))
    }

    fn list_terminator(&self, key: &str) -> Option<char> {
        self.list_keys
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, t)| *t)
    }

    /// Sanitize one line. Blank, comment and non-assignment lines pass
    /// through untouched.
    pub fn sanitize_line(&self, line: &str) -> String {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT) || trimmed.starts_with('#') {
            return line.to_string();
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return line.to_string();
        };

        let key = key.trim();
        let value = strip_value(value);

        if value.is_empty() {
            if self.comments_out(key) {
                return format!("{COMMENT} {key}=");
            }
            if self.is_numeric(key) {
                return format!("{key}=0");
            }
            return format!("{key}=");
        }

        match self.list_terminator(key) {
            Some(terminator) if !value.ends_with(terminator) => {
                format!("{key}={value}{terminator}")
            }
            _ => format!("{key}={value}"),
        }
    }

    /// Sanitize every line, keeping each line's own ending.
    pub fn sanitize_content(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len());
        for raw in content.split_inclusive('\n') {
            let (line, ending) = split_line_ending(raw);
            let sanitized = self.sanitize_line(line);
            if sanitized == line {
                out.push_str(raw);
            } else {
                out.push_str(&sanitized);
                out.push_str(ending);
            }
        }
        out
    }

    /// Rewrite `path` in place. Returns whether anything changed; an
    /// unchanged file is not rewritten.
    pub fn sanitize_file(&self, path: &Path) -> ProvisionResult<bool> {
        let original = std::fs::read_to_string(path).map_err(ProvisionError::io(path))?;
        let sanitized = self.sanitize_content(&original);
        if sanitized == original {
            debug!("{:?} already clean", path);
            return Ok(false);
        }

        let changed = original
            .lines()
            .zip(sanitized.lines())
            .filter(|(before, after)| before != after)
            .count();
        std::fs::write(path, sanitized).map_err(ProvisionError::io(path))?;
        info!("Sanitized {:?} ({} lines changed)", path, changed);
        Ok(true)
    }
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    let body = raw
        .strip_suffix("\r\n")
        .or_else(|| raw.strip_suffix('\n'))
        .unwrap_or(raw);
    (body, &raw[body.len()..])
}

/// Drop an inline comment, surrounding whitespace and any run of trailing
/// commas, including commas separated by spaces.
fn strip_value(raw: &str) -> &str {
    let without_comment = match raw.find(COMMENT) {
        Some(pos) => &raw[..pos],
        None => raw,
    };
    without_comment
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .trim_start()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(text: &str) -> String {
        SanitizerRules::default().sanitize_content(text)
    }

    #[test]
    fn empty_numeric_key_defaults_to_zero() {
        assert_eq!(sanitize("KillsToWin="), "KillsToWin=0");
        assert_eq!(sanitize("MaxPlayers=  // set later"), "MaxPlayers=0");
        assert_eq!(sanitize("KillsToWin= , ,"), "KillsToWin=0");
    }

    #[test]
    fn empty_ring_settings_is_commented_out() {
        assert_eq!(sanitize("RingSettings="), "// RingSettings=");
        assert_eq!(sanitize("RingSettings=,"), "// RingSettings=");
        assert_eq!(sanitize("RingSettings=0,1,2"), "RingSettings=0,1,2");
    }

    #[test]
    fn comments_and_commas_are_stripped() {
        assert_eq!(sanitize("ServerName=Test, // old name"), "ServerName=Test");
        assert_eq!(sanitize("  TeamMode = SQUAD ,,"), "TeamMode=SQUAD");
    }

    #[test]
    fn list_key_gains_terminator() {
        assert_eq!(sanitize("Loadout=Pistol;Ammo"), "Loadout=Pistol;Ammo;");
        assert_eq!(sanitize("Loadout=Pistol;"), "Loadout=Pistol;");
        assert_eq!(sanitize("Loadout="), "Loadout=");
    }

    #[test]
    fn booleans_keep_their_value() {
        assert_eq!(sanitize("AllowRespawnMinigame=false"), "AllowRespawnMinigame=false");
        assert_eq!(sanitize("UseKicks=true,"), "UseKicks=true");
    }

    #[test]
    fn non_assignments_pass_through() {
        let text = "// header\n\n# note\n   \nnot an assignment\n";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn sanitizing_twice_changes_nothing() {
        let text = "// generated\nKillsToWin=\nRingSettings=\nLoadout=A;B\nServerName=x, // y\n\nRoundsToWin=3,\nTeamMode=SQUAD , ,\n";
        let once = sanitize(text);
        assert_eq!(sanitize(&once), once);
        assert_eq!(
            once,
            "// generated\nKillsToWin=0\n// RingSettings=\nLoadout=A;B;\nServerName=x\n\nRoundsToWin=3\nTeamMode=SQUAD\n"
        );

        for line in ["TeamMode=SQUAD , ,", "KillsToWin= , ,", "RingSettings= ,", "Loadout=A , ;,"] {
            let once = sanitize(line);
            assert_eq!(sanitize(&once), once, "{line}");
        }
    }

    #[test]
    fn crlf_line_endings_are_preserved() {
        let text = "// header\r\nKillsToWin=\r\nServerName=Test\r\nMaxPlayers=64";
        assert_eq!(
            sanitize(text),
            "// header\r\nKillsToWin=0\r\nServerName=Test\r\nMaxPlayers=64"
        );
    }

    #[test]
    fn clean_file_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin_settings.txt");
        std::fs::write(&path, "KillsToWin=\n").unwrap();

        let rules = SanitizerRules::default();
        assert!(rules.sanitize_file(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "KillsToWin=0\n");
        assert!(!rules.sanitize_file(&path).unwrap());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent.txt");
        let err = SanitizerRules::default().sanitize_file(&absent).unwrap_err();
        match err {
            ProvisionError::Io { path, .. } => assert_eq!(path, absent),
            other => panic!("unexpected {other:?}"),
        }
    }
}
