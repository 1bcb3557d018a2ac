//! Capabilities the sync engine depends on.
//!
//! The executor only sees these traits, so tests can swap in scripted
//! implementations without touching real repositories.

use std::path::Path;

use crate::cancel::OpContext;
use crate::domain::{AheadBehind, WorktreeState};
use crate::error::Result;

/// Port for Git operations. Every call names the working tree explicitly.
pub trait GitPort: Send + Sync {
    /// Read-only inspection of branch, cleanliness and in-progress operations
    fn inspect(&self, path: &Path) -> Result<WorktreeState>;

    /// Fetch from `remote`; leaves the working tree alone
    fn fetch(&self, path: &Path, remote: &str, prune: bool, ctx: &OpContext) -> Result<()>;

    /// Counts against the current branch's upstream, `None` when there is no upstream or HEAD is detached
    fn ahead_behind(&self, path: &Path) -> Result<Option<AheadBehind>>;

    /// Fast-forward the current branch to its upstream. Never merges or rebases.
    fn fast_forward(&self, path: &Path, ctx: &OpContext) -> Result<()>;

    /// Push the current branch to its upstream
    fn push(&self, path: &Path, ctx: &OpContext) -> Result<()>;

    /// Clone `url` into `dest`, which must not exist yet
    fn clone_repo(&self, url: &str, dest: &Path, ctx: &OpContext) -> Result<()>;
}

/// Repository listed by a hosting service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepo {
    pub name: String,
    pub clone_url: String,
}

/// Port for the optional hosting service used to clone missing repositories.
pub trait HostingPort: Send + Sync {
    /// Clone URL for a repository of the authenticated account, if it exists
    fn clone_url(&self, name: &str, ctx: &OpContext) -> Result<Option<String>>;

    /// Repositories owned by `owner` (the authenticated account when `None`)
    fn list_repositories(
        &self,
        owner: Option<&str>,
        limit: usize,
        ctx: &OpContext,
    ) -> Result<Vec<RemoteRepo>>;
}
