//! Sync step for a single repository.
//!
//! `Executor::execute` always returns exactly one `SyncOutcome`; every
//! failure below it is classified into the outcome instead of propagating.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::OpContext;
use crate::domain::{RepositoryDescriptor, SyncMode, SyncOutcome, SyncStatus};
use crate::error::{Result, SyncError};
use crate::ports::{GitPort, HostingPort};

/// Status plus the notes collected on the way to it.
type Classified = (SyncStatus, Vec<String>);

pub struct Executor {
    git: Arc<dyn GitPort>,
    hosting: Option<Arc<dyn HostingPort>>,
    mode: SyncMode,
}

impl Executor {
    pub fn new(git: Arc<dyn GitPort>, hosting: Option<Arc<dyn HostingPort>>, mode: SyncMode) -> Self {
        Self { git, hosting, mode }
    }

    pub fn execute(&self, repo: &RepositoryDescriptor, ctx: &OpContext) -> SyncOutcome {
        let started = Instant::now();
        let (status, notes) = match self.sync(repo, ctx) {
            Ok(classified) => classified,
            Err(e) => {
                warn!("{}: {}", repo.path.display(), e);
                (SyncStatus::Error, vec![e.to_string()])
            }
        };
        let detail = if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        };
        info!("{}: {}", repo.name, status);
        SyncOutcome::new(repo.clone(), status, detail, started.elapsed())
    }

    fn sync(&self, repo: &RepositoryDescriptor, ctx: &OpContext) -> Result<Classified> {
        if repo.missing {
            return self.clone_missing(repo, ctx);
        }

        let path = repo.path.as_path();
        let state = self.git.inspect(path)?;

        if let Some(reason) = state.skip_reason() {
            debug!("{}: not updating, {}", path.display(), reason);
            let mut notes = vec![reason];
            if let Some(remote) = &state.remote {
                notes.extend(self.refresh_remote(repo, remote, ctx)?);
            }
            return Ok((SyncStatus::DirtySkipped, notes));
        }

        let remote = state.remote.clone().ok_or(SyncError::NoRemote)?;
        self.git.fetch(path, &remote, self.mode.prune, ctx)?;

        let Some(counts) = self.git.ahead_behind(path)? else {
            let note = if state.is_detached {
                "detached HEAD, fetched only"
            } else {
                "no upstream branch, fetched only"
            };
            return Ok((SyncStatus::UpToDate, vec![note.to_string()]));
        };

        if counts.is_diverged() {
            return Ok((
                SyncStatus::Conflict,
                vec![format!(
                    "diverged from upstream ({} ahead, {} behind)",
                    counts.ahead, counts.behind
                )],
            ));
        }

        let mut notes = Vec::new();
        let status = if counts.behind == 0 {
            SyncStatus::UpToDate
        } else if self.mode.fetch_only {
            notes.push(format!("{} behind upstream (fetch only)", plural(counts.behind, "commit")));
            SyncStatus::UpToDate
        } else {
            self.git.fast_forward(path, ctx)?;
            notes.push(plural(counts.behind, "new commit"));
            SyncStatus::FastForwarded
        };

        if counts.ahead > 0 {
            notes.push(self.push_note(repo, counts.ahead, ctx)?);
        }

        Ok((status, notes))
    }

    /// Fetch for a tree that will not be updated. Fetching only moves
    /// remote-tracking refs; a failure is a note, a timeout or cancellation is not.
    fn refresh_remote(&self, repo: &RepositoryDescriptor, remote: &str, ctx: &OpContext) -> Result<Option<String>> {
        match self.git.fetch(&repo.path, remote, self.mode.prune, ctx) {
            Ok(()) => Ok(None),
            Err(e) if e.is_interrupt() => Err(e),
            Err(e) => {
                warn!("{}: {}", repo.path.display(), e);
                Ok(Some(e.to_string()))
            }
        }
    }

    /// Push outcome as a secondary note. Only a timeout or cancellation fails the repository.
    fn push_note(&self, repo: &RepositoryDescriptor, ahead: usize, ctx: &OpContext) -> Result<String> {
        if !self.mode.push {
            return Ok(format!("{} not pushed", plural(ahead, "local commit")));
        }
        match self.git.push(&repo.path, ctx) {
            Ok(()) => Ok(format!("pushed {}", plural(ahead, "commit"))),
            Err(e) if e.is_interrupt() => Err(e),
            Err(e) => {
                warn!("{}: {}", repo.path.display(), e);
                Ok(e.to_string())
            }
        }
    }

    fn clone_missing(&self, repo: &RepositoryDescriptor, ctx: &OpContext) -> Result<Classified> {
        if !self.mode.clone_missing {
            return Err(SyncError::NotCloneable);
        }
        let url = match &repo.remote_url {
            Some(url) => url.clone(),
            None => self.lookup_clone_url(repo, ctx)?.ok_or(SyncError::NotCloneable)?,
        };

        info!("cloning {} into {}", url, repo.path.display());
        self.git.clone_repo(&url, &repo.path, ctx)?;
        Ok((SyncStatus::Cloned, vec![format!("from {url}")]))
    }

    fn lookup_clone_url(&self, repo: &RepositoryDescriptor, ctx: &OpContext) -> Result<Option<String>> {
        let Some(hosting) = &self.hosting else {
            return Ok(None);
        };
        let Some(name) = repo.path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        hosting.clone_url(name, ctx)
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}
