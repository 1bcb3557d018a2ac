use git2::{ErrorCode, Repository as GitRepository, RepositoryState, StatusOptions};
use std::path::Path;
use tracing::debug;

use crate::cancel::OpContext;
use crate::domain::{AheadBehind, WorktreeState};
use crate::error::{Result, SyncError};
use crate::ports::GitPort;
use crate::process::{self, git_command};

/// `GitPort` backed by libgit2 for local reads and the `git` binary for
/// everything that touches the network or the working tree, so those
/// steps can be killed when they overrun.
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<GitRepository> {
        GitRepository::open(path).map_err(|e| SyncError::Inspect {
            reason: format!("failed to open git repository at {}: {}", path.display(), e.message()),
        })
    }
}

impl GitPort for GitCli {
    fn inspect(&self, path: &Path) -> Result<WorktreeState> {
        let git_repo = Self::open(path)?;

        let in_progress = describe_state(git_repo.state()).map(str::to_string);

        // Get branch information
        let head = match git_repo.head() {
            Ok(reference) => Some(reference),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        let (branch, is_detached, upstream_remote) = match &head {
            Some(reference) if reference.is_branch() => {
                let remote = reference
                    .name()
                    .and_then(|name| git_repo.branch_upstream_remote(name).ok())
                    .and_then(|buf| buf.as_str().map(str::to_string));
                (reference.shorthand().map(str::to_string), false, remote)
            }
            Some(_) => (None, true, None),
            None => (None, false, None),
        };

        // Check working directory status, untracked files included
        let mut status_options = StatusOptions::new();
        status_options.include_untracked(true);
        status_options.include_ignored(false);

        let statuses = git_repo.statuses(Some(&mut status_options))?;
        let is_dirty = !statuses.is_empty();

        let remote = match upstream_remote {
            Some(remote) => Some(remote),
            None => default_remote(&git_repo)?,
        };

        Ok(WorktreeState {
            branch,
            is_detached,
            is_dirty,
            in_progress,
            remote,
        })
    }

    fn fetch(&self, path: &Path, remote: &str, prune: bool, ctx: &OpContext) -> Result<()> {
        let mut cmd = git_command(path);
        cmd.args(["fetch", "--quiet"]);
        if prune {
            cmd.arg("--prune");
        }
        cmd.arg(remote);

        process::run(cmd, ctx).map_err(|e| {
            SyncError::from_process(e, |reason| SyncError::Fetch {
                remote: remote.to_string(),
                reason,
            })
        })?;
        debug!("fetched {} in {}", remote, path.display());
        Ok(())
    }

    fn ahead_behind(&self, path: &Path) -> Result<Option<AheadBehind>> {
        let git_repo = Self::open(path)?;

        let head = match git_repo.head() {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !head.is_branch() {
            return Ok(None);
        }
        let (Some(local_oid), Some(ref_name)) = (head.target(), head.name()) else {
            return Ok(None);
        };

        let upstream_ref = match git_repo.branch_upstream_name(ref_name) {
            Ok(buf) => buf,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(upstream_str) = upstream_ref.as_str() else {
            return Ok(None);
        };
        // Upstream configured but gone from the remote
        let upstream_oid = match git_repo.refname_to_id(upstream_str) {
            Ok(oid) => oid,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (ahead, behind) = git_repo.graph_ahead_behind(local_oid, upstream_oid)?;
        Ok(Some(AheadBehind { ahead, behind }))
    }

    fn fast_forward(&self, path: &Path, ctx: &OpContext) -> Result<()> {
        let mut cmd = git_command(path);
        cmd.args(["merge", "--ff-only", "--quiet", "@{upstream}"]);
        process::run(cmd, ctx)
            .map_err(|e| SyncError::from_process(e, |reason| SyncError::FastForward { reason }))?;
        Ok(())
    }

    fn push(&self, path: &Path, ctx: &OpContext) -> Result<()> {
        let mut cmd = git_command(path);
        cmd.args(["push", "--quiet"]);
        process::run(cmd, ctx)
            .map_err(|e| SyncError::from_process(e, |reason| SyncError::Push { reason }))?;
        Ok(())
    }

    fn clone_repo(&self, url: &str, dest: &Path, ctx: &OpContext) -> Result<()> {
        let parent = dest.parent().ok_or_else(|| SyncError::Clone {
            reason: format!("{} has no parent directory", dest.display()),
        })?;
        std::fs::create_dir_all(parent).map_err(|e| SyncError::Clone {
            reason: format!("failed to create {}: {}", parent.display(), e),
        })?;

        let mut cmd = git_command(parent);
        cmd.args(["clone", "--quiet", "--", url]).arg(dest);
        process::run(cmd, ctx)
            .map_err(|e| SyncError::from_process(e, |reason| SyncError::Clone { reason }))?;
        debug!("cloned {} into {}", url, dest.display());
        Ok(())
    }
}

fn describe_state(state: RepositoryState) -> Option<&'static str> {
    match state {
        RepositoryState::Clean => None,
        RepositoryState::Merge => Some("merge"),
        RepositoryState::Revert | RepositoryState::RevertSequence => Some("revert"),
        RepositoryState::CherryPick | RepositoryState::CherryPickSequence => Some("cherry-pick"),
        RepositoryState::Bisect => Some("bisect"),
        RepositoryState::Rebase
        | RepositoryState::RebaseInteractive
        | RepositoryState::RebaseMerge => Some("rebase"),
        RepositoryState::ApplyMailbox | RepositoryState::ApplyMailboxOrRebase => Some("am"),
    }
}

fn default_remote(git_repo: &GitRepository) -> Result<Option<String>> {
    let remotes = git_repo.remotes()?;
    let names: Vec<&str> = remotes.iter().flatten().collect();
    if names.contains(&"origin") {
        return Ok(Some("origin".to_string()));
    }
    Ok(names.first().map(|name| name.to_string()))
}
