use std::path::Path;

use tracing::info;

use crate::core::error::{ProvisionError, ProvisionResult};

/// Human-supplied identity of the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseSettings {
    pub name: String,
    pub password: String,
    pub description: String,
}

impl BaseSettings {
    pub fn validate(&self) -> ProvisionResult<()> {
        if flatten(&self.name).is_empty() {
            return Err(ProvisionError::Validation("Server name must not be empty".into()));
        }
        Ok(())
    }

    fn entries(&self) -> [(&'static str, String); 3] {
        [
            ("ServerName", flatten(&self.name)),
            ("Password", flatten(&self.password)),
            ("ServerDescription", flatten(&self.description)),
        ]
    }

    /// Upsert the three keys into the settings file at `path`, creating it
    /// when absent.
    pub fn write_to(&self, path: &Path) -> ProvisionResult<()> {
        self.validate()?;
        let existing = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ProvisionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let updated = upsert_keys(&existing, &self.entries());
        std::fs::write(path, updated).map_err(ProvisionError::io(path))?;
        info!("Wrote base settings to {:?}", path);
        Ok(())
    }
}

/// Collapse line breaks so a value cannot inject extra keys.
fn flatten(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace the first assignment of each key, appending keys not present.
/// Every other line is kept as-is.
pub fn upsert_keys<V: AsRef<str>>(content: &str, entries: &[(&str, V)]) -> String {
    let mut lines: Vec<String> = content.lines().map(|s| s.to_string()).collect();

    for (config_key, value) in entries {
        let replacement = format!("{}={}", config_key, value.as_ref());
        let existing = lines.iter_mut().find(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.is_empty() {
                return false;
            }
            trimmed
                .split_once('=')
                .is_some_and(|(key, _)| key.trim() == *config_key)
        });

        match existing {
            Some(line) => *line = replacement,
            None => lines.push(replacement),
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BaseSettings {
        BaseSettings {
            name: "Friday Night".into(),
            password: "hunter2".into(),
            description: "Squads only\nno teaming".into(),
        }
    }

    #[test]
    fn existing_keys_are_replaced_in_place() {
        let content = "// server\nServerName=Old\nMaxPlayers=70\nPassword=\n";
        let out = upsert_keys(content, &settings().entries());
        assert_eq!(
            out,
            "// server\nServerName=Friday Night\nMaxPlayers=70\nPassword=hunter2\nServerDescription=Squads only no teaming\n"
        );
    }

    #[test]
    fn commented_keys_are_not_touched() {
        let out = upsert_keys("// ServerName=Example\n", &[("ServerName", "Real")]);
        assert_eq!(out, "// ServerName=Example\nServerName=Real\n");
    }

    #[test]
    fn missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game_settings.txt");
        settings().write_to(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("ServerName=Friday Night\n"));
        assert!(text.contains("ServerDescription=Squads only no teaming\n"));
    }

    #[test]
    fn blank_name_is_rejected() {
        let base = BaseSettings {
            name: " \n ".into(),
            ..settings()
        };
        assert!(matches!(base.validate(), Err(ProvisionError::Validation(_))));
    }
}
