use std::path::{Path, PathBuf};
use thiserror::Error;

/// Central error type for the provisioning backend.
/// Every module returns `Result<T, ProvisionError>`.
#[derive(Debug, Error)]
pub enum ProvisionError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Release {tag} not found in {repo}")]
    ReleaseNotFound { repo: String, tag: String },

    #[error("Asset {asset} not found in release {tag} of {repo}")]
    AssetNotFound {
        repo: String,
        tag: String,
        asset: String,
    },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Input ───────────────────────────────────────────
    #[error("Invalid input: {0}")]
    Validation(String),

    // ── Reset ───────────────────────────────────────────
    #[error("Core data directory missing after reset: {0:?}")]
    CoreDataMissing(PathBuf),

    // ── Process ─────────────────────────────────────────
    #[error("Failed to spawn {program:?}: {source}")]
    ProcessSpawn {
        program: PathBuf,
        source: std::io::Error,
    },

    // ── Control flow ────────────────────────────────────
    #[error("Cancelled")]
    Cancelled,

    #[error("Phase {phase} failed: {source}")]
    Phase {
        phase: &'static str,
        source: Box<ProvisionError>,
    },
}

/// Convenience alias used throughout the crate.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Coarse classification used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Fetch,
    Extraction,
    FileSystem,
    Process,
    Cancellation,
}

impl ProvisionError {
    /// Builds a `map_err` closure that tags an IO error with its path.
    pub fn io(path: impl AsRef<Path>) -> impl FnOnce(std::io::Error) -> ProvisionError {
        let path = path.as_ref().to_path_buf();
        move |source| ProvisionError::Io { path, source }
    }

    pub fn in_phase(self, phase: &'static str) -> ProvisionError {
        match self {
            // Cancellation and already-tagged errors pass through untouched.
            ProvisionError::Cancelled | ProvisionError::Phase { .. } => self,
            other => ProvisionError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::Io { .. } | ProvisionError::CoreDataMissing(_) => {
                ErrorKind::FileSystem
            }
            ProvisionError::Http(_)
            | ProvisionError::DownloadFailed { .. }
            | ProvisionError::ReleaseNotFound { .. }
            | ProvisionError::AssetNotFound { .. }
            | ProvisionError::DigestMismatch { .. } => ErrorKind::Fetch,
            ProvisionError::Zip(_) | ProvisionError::Extraction(_) => ErrorKind::Extraction,
            ProvisionError::Json(_) | ProvisionError::Validation(_) => ErrorKind::Validation,
            ProvisionError::ProcessSpawn { .. } => ErrorKind::Process,
            ProvisionError::Cancelled => ErrorKind::Cancellation,
            ProvisionError::Phase { source, .. } => source.kind(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_tag_wraps_once_and_keeps_kind() {
        let err = ProvisionError::Validation("missing name".into())
            .in_phase("WriteBaseSettings")
            .in_phase("Outer");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "Phase WriteBaseSettings failed: Invalid input: missing name"
        );
    }

    #[test]
    fn cancellation_is_never_phase_tagged() {
        let err = ProvisionError::Cancelled.in_phase("HardReset");
        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(err.is_cancelled());
    }

    #[test]
    fn io_helper_keeps_path() {
        let err = ProvisionError::io("/srv/tabg")(std::io::Error::other("boom"));
        match err {
            ProvisionError::Io { path, .. } => assert_eq!(path, PathBuf::from("/srv/tabg")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
