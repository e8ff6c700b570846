use std::path::{Component, Path};

use chrono::Utc;
use tracing::{debug, info};

use crate::core::error::{ProvisionError, ProvisionResult};
use crate::core::state::ProvisionerSettings;

/// Stock server files shipped with a clean TABG dedicated server.
pub const DEFAULT_RULES: &[&str] = &[
    "TABG_Data/",
    "MonoBleedingEdge/",
    "TABG.exe",
    "UnityPlayer.dll",
    "UnityCrashHandler64.exe",
    "steam_api64.dll",
    "steam_appid.txt",
];

/// How a rule matches relative paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Exact relative path.
    Literal,
    /// The directory itself and everything beneath it.
    DirectoryPrefix,
}

/// A single whitelist entry, stored normalized: lowercase, `/`-separated,
/// no leading `./` and no trailing separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistRule {
    pattern: String,
    kind: RuleKind,
}

impl WhitelistRule {
    /// Parse one line of the rules file. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let unified = trimmed.replace('\\', "/");
        let trailing_separator = unified.ends_with('/');
        let pattern = normalize_str(&unified);
        if pattern.is_empty() {
            return None;
        }

        let last = pattern.rsplit('/').next().unwrap_or(&pattern);
        let has_extension = Path::new(last).extension().is_some();
        let kind = if trailing_separator || !has_extension {
            RuleKind::DirectoryPrefix
        } else {
            RuleKind::Literal
        };

        Some(Self { pattern, kind })
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// `relative` must already be normalized with [`normalize_relative`].
    pub fn matches(&self, relative: &str) -> bool {
        match self.kind {
            RuleKind::Literal => relative == self.pattern,
            RuleKind::DirectoryPrefix => is_same_or_nested(relative, &self.pattern),
        }
    }
}

/// `true` if `path` equals `dir` or lies beneath it (both normalized).
pub fn is_same_or_nested(path: &str, dir: &str) -> bool {
    path == dir
        || (path.len() > dir.len()
            && path.starts_with(dir)
            && path.as_bytes()[dir.len()] == b'/')
}

/// Normalize a relative filesystem path for case-insensitive comparison.
pub fn normalize_relative(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_str(raw: &str) -> String {
    raw.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("/")
}

/// Ordered rule set as loaded from (or persisted to) the rules file.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    /// Original spelling, kept so the persisted file stays readable.
    lines: Vec<String>,
    rules: Vec<WhitelistRule>,
}

impl RuleSet {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for line in lines {
            set.push_line(line.as_ref());
        }
        set
    }

    pub fn defaults() -> Self {
        Self::from_lines(DEFAULT_RULES)
    }

    /// Entries that every rules file must carry for the pipeline to work.
    pub fn required_entries(settings: &ProvisionerSettings) -> Vec<String> {
        vec![
            format!("{}/", settings.core_data_dir),
            crate::core::loaders::doorstop::DESCRIPTOR_FILE.to_string(),
            settings.base_settings_file.clone(),
            settings.generated_config.clone(),
        ]
    }

    fn push_line(&mut self, line: &str) {
        if let Some(rule) = WhitelistRule::parse(line) {
            self.lines.push(line.trim().to_string());
            self.rules.push(rule);
        }
    }

    pub fn rules(&self) -> &[WhitelistRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, entry: &str) -> bool {
        match WhitelistRule::parse(entry) {
            Some(candidate) => self.rules.iter().any(|r| r.pattern == candidate.pattern),
            None => true,
        }
    }

    /// Append entries missing from the set (case-insensitive). Returns how many were added.
    pub fn ensure_entries<S: AsRef<str>>(&mut self, entries: &[S]) -> usize {
        let mut added = 0;
        for entry in entries {
            let entry = entry.as_ref();
            if self.contains(entry) {
                continue;
            }
            debug!("Adding required whitelist entry {}", entry);
            self.push_line(entry);
            added += 1;
        }
        added
    }

    pub fn matches(&self, relative: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(relative))
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "# Server whitelist, generated {}\n# One path per line. Entries ending in '/' or without an extension keep a whole directory.\n",
            Utc::now().to_rfc3339()
        );
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Load `path`, or synthesize it from [`DEFAULT_RULES`] when absent.
    /// Missing `required` entries are appended and the file is rewritten
    /// only if something changed. Returns the set and whether the file was created.
    pub fn load_or_create<S: AsRef<str>>(
        path: &Path,
        required: &[S],
    ) -> ProvisionResult<(Self, bool)> {
        let (mut set, created) = match std::fs::read_to_string(path) {
            Ok(raw) => (Self::from_lines(raw.lines()), false),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("Whitelist {:?} not found, creating it from defaults", path);
                (Self::defaults(), true)
            }
            Err(source) => {
                return Err(ProvisionError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let added = set.ensure_entries(required);
        if created || added > 0 {
            std::fs::write(path, set.render()).map_err(ProvisionError::io(path))?;
            info!(
                "Persisted whitelist {:?} ({} rules, {} added)",
                path,
                set.len(),
                added
            );
        }

        Ok((set, created))
    }
}
