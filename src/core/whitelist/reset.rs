// ─── Whitelist Reset ───
// Two-pass destructive reset: classify the whole tree first, then delete
// files before directories, deepest paths first.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::rules::{is_same_or_nested, normalize_relative, RuleSet};
use crate::core::error::{ProvisionError, ProvisionResult};
use crate::core::state::ProvisionerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Keep,
    Delete,
}

/// One filesystem entry found under the server root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    pub relative: String,
    pub is_dir: bool,
}

/// Outcome of a reset. Failures are per-entry and never abort the batch.
#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub kept: usize,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub rules_file_created: bool,
}

/// Classification result before anything is touched on disk.
#[derive(Debug, Clone, Default)]
pub struct DeletionPlan {
    pub kept: Vec<TreeEntry>,
    /// Files first, then directories; each group deepest-first.
    pub ordered: Vec<TreeEntry>,
}

/// Deletes everything under a server root that the whitelist does not keep.
#[derive(Debug, Clone)]
pub struct ResetEngine {
    root: PathBuf,
    core_data_dir: String,
    presets_dir: String,
    whitelist_file: String,
}

impl ResetEngine {
    pub fn new(root: impl Into<PathBuf>, settings: &ProvisionerSettings) -> Self {
        Self {
            root: root.into(),
            core_data_dir: settings.core_data_dir.clone(),
            presets_dir: settings.presets_dir.clone(),
            whitelist_file: settings.whitelist_file.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn whitelist_path(&self) -> PathBuf {
        self.root.join(&self.whitelist_file)
    }

    pub fn core_data_path(&self) -> PathBuf {
        self.root.join(&self.core_data_dir)
    }

    /// Load the rules file, creating it from defaults and adding `required`
    /// entries as needed.
    pub fn prepare_rules<S: AsRef<str>>(&self, required: &[S]) -> ProvisionResult<(RuleSet, bool)> {
        RuleSet::load_or_create(&self.whitelist_path(), required)
    }

    /// Pure classification of a relative path. No filesystem access.
    pub fn classify(&self, relative: &str, rules: &RuleSet) -> Classification {
        let presets = self.presets_dir.to_lowercase();
        let whitelist = normalize_relative(Path::new(&self.whitelist_file));

        if is_same_or_nested(relative, &presets)
            || relative == whitelist
            || rules.matches(relative)
        {
            Classification::Keep
        } else {
            Classification::Delete
        }
    }

    /// First pass: walk the tree and classify every entry.
    pub fn plan(&self, rules: &RuleSet) -> ProvisionResult<DeletionPlan> {
        if !self.root.is_dir() {
            return Err(ProvisionError::Validation(format!(
                "Server directory {:?} does not exist",
                self.root
            )));
        }

        let mut entries = Vec::new();
        for item in WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    warn!("Skipping unreadable entry during reset scan: {}", err);
                    continue;
                }
            };
            let relative = match item.path().strip_prefix(&self.root) {
                Ok(rel) => normalize_relative(rel),
                Err(_) => continue,
            };
            entries.push(TreeEntry {
                path: item.path().to_path_buf(),
                relative,
                is_dir: item.file_type().is_dir(),
            });
        }

        Ok(self.plan_entries(entries, rules))
    }

    /// Classify a pre-collected entry list and order the deletions.
    pub fn plan_entries(&self, entries: Vec<TreeEntry>, rules: &RuleSet) -> DeletionPlan {
        let mut kept = Vec::new();
        let mut doomed = Vec::new();
        for entry in entries {
            match self.classify(&entry.relative, rules) {
                Classification::Keep => kept.push(entry),
                Classification::Delete => doomed.push(entry),
            }
        }

        // A directory holding anything kept must survive too.
        let mut kept_ancestors = HashSet::new();
        for entry in &kept {
            let mut current = entry.relative.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                if !kept_ancestors.insert(parent.to_string()) {
                    break;
                }
                current = parent;
            }
        }
        let (rescued, doomed): (Vec<_>, Vec<_>) = doomed
            .into_iter()
            .partition(|e| e.is_dir && kept_ancestors.contains(&e.relative));
        kept.extend(rescued);

        let (mut dirs, mut files): (Vec<_>, Vec<_>) = doomed.into_iter().partition(|e| e.is_dir);
        let by_depth = |a: &TreeEntry, b: &TreeEntry| {
            b.path
                .as_os_str()
                .len()
                .cmp(&a.path.as_os_str().len())
                .then_with(|| a.path.cmp(&b.path))
        };
        files.sort_by(by_depth);
        dirs.sort_by(by_depth);
        files.extend(dirs);

        DeletionPlan {
            kept,
            ordered: files,
        }
    }

    /// Second pass: delete according to `plan`, then verify the core data
    /// directory survived.
    pub fn execute(&self, plan: &DeletionPlan) -> ProvisionResult<DeletionReport> {
        let mut report = DeletionReport {
            kept: plan.kept.len(),
            ..DeletionReport::default()
        };

        for entry in &plan.ordered {
            let result = if entry.is_dir {
                std::fs::remove_dir(&entry.path)
            } else {
                std::fs::remove_file(&entry.path)
            };
            match result {
                Ok(()) => {
                    debug!("Deleted {:?}", entry.path);
                    report.deleted.push(entry.path.clone());
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Already gone: {:?}", entry.path);
                }
                Err(err) => {
                    warn!("Could not delete {:?}: {}", entry.path, err);
                    report.failed.push((entry.path.clone(), err.to_string()));
                }
            }
        }

        let core = self.core_data_path();
        if !core.is_dir() {
            return Err(ProvisionError::CoreDataMissing(core));
        }

        Ok(report)
    }

    /// Classify then delete. The rules are taken as given.
    #[instrument(skip(self, rules), fields(root = ?self.root))]
    pub fn reset(&self, rules: &RuleSet) -> ProvisionResult<DeletionReport> {
        let plan = self.plan(rules)?;
        info!(
            "Reset plan: keeping {} entries, deleting {}",
            plan.kept.len(),
            plan.ordered.len()
        );
        let report = self.execute(&plan)?;
        info!(
            "Reset finished: kept={} deleted={} failed={}",
            report.kept,
            report.deleted.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Load (or create) the rules file, then reset against it.
    pub fn reset_with_rules_file<S: AsRef<str>>(
        &self,
        required: &[S],
    ) -> ProvisionResult<DeletionReport> {
        let (rules, created) = self.prepare_rules(required)?;
        let mut report = self.reset(&rules)?;
        report.rules_file_created = created;
        Ok(report)
    }
}
