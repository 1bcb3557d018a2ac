use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One sync target produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    pub name: String,
    pub path: PathBuf,
    /// Known clone URL, used when the working tree is missing
    pub remote_url: Option<String>,
    /// Declared but not present on disk
    pub missing: bool,
}

impl RepositoryDescriptor {
    pub fn present(path: PathBuf, name: String) -> Self {
        Self {
            name,
            path,
            remote_url: None,
            missing: false,
        }
    }

    pub fn declared(path: PathBuf, name: String, remote_url: Option<String>) -> Self {
        let missing = !is_work_tree(&path);
        Self {
            name,
            path,
            remote_url,
            missing,
        }
    }
}

impl fmt::Display for RepositoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// A directory is a working tree when it carries the `.git` marker (directory or gitfile).
pub fn is_work_tree(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Repository declared in configuration or by the hosting service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredRepo {
    pub path: PathBuf,
    #[serde(default)]
    pub url: Option<String>,
}

/// Closed set of per-repository results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    UpToDate,
    FastForwarded,
    Cloned,
    DirtySkipped,
    Conflict,
    Error,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::UpToDate,
        SyncStatus::FastForwarded,
        SyncStatus::Cloned,
        SyncStatus::DirtySkipped,
        SyncStatus::Conflict,
        SyncStatus::Error,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::UpToDate => "up-to-date",
            SyncStatus::FastForwarded => "fast-forwarded",
            SyncStatus::Cloned => "cloned",
            SyncStatus::DirtySkipped => "dirty-skipped",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, SyncStatus::Conflict | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of processing exactly one descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub descriptor: RepositoryDescriptor,
    pub status: SyncStatus,
    pub detail: Option<String>,
    pub duration: Duration,
}

impl SyncOutcome {
    pub fn new(
        descriptor: RepositoryDescriptor,
        status: SyncStatus,
        detail: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            descriptor,
            status,
            detail,
            duration,
        }
    }

    pub fn error(descriptor: RepositoryDescriptor, detail: impl Into<String>) -> Self {
        Self::new(descriptor, SyncStatus::Error, Some(detail.into()), Duration::ZERO)
    }
}

/// Which steps the executor may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMode {
    /// Fetch only; never touch the working tree
    pub fetch_only: bool,
    pub push: bool,
    pub clone_missing: bool,
    pub prune: bool,
}

impl Default for SyncMode {
    fn default() -> Self {
        Self {
            fetch_only: false,
            push: false,
            clone_missing: true,
            prune: false,
        }
    }
}

/// Local state of a working tree, read before any network step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeState {
    pub branch: Option<String>,
    pub is_detached: bool,
    pub is_dirty: bool,
    /// Name of an unfinished operation such as "merge" or "rebase"
    pub in_progress: Option<String>,
    /// Remote to fetch from: the branch's upstream remote, else `origin`, else the first remote
    pub remote: Option<String>,
}

impl WorktreeState {
    /// Reason the working tree must not be updated, if any.
    pub fn skip_reason(&self) -> Option<String> {
        if let Some(op) = &self.in_progress {
            return Some(format!("{op} in progress"));
        }
        if self.is_dirty {
            return Some("uncommitted changes".to_string());
        }
        None
    }
}

/// Ahead/behind counts of the current branch against its upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AheadBehind {
    pub ahead: usize,
    pub behind: usize,
}

impl AheadBehind {
    pub fn is_diverged(&self) -> bool {
        self.ahead > 0 && self.behind > 0
    }
}
