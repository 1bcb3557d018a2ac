//! Discovery, scheduling and aggregation wired into a single call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cancel::{CancelToken, OpContext};
use crate::config::dedup_paths;
use crate::domain::{DeclaredRepo, SyncMode};
use crate::executor::Executor;
use crate::git::GitCli;
use crate::github::{CloneProtocol, GhCli};
use crate::ports::{GitPort, HostingPort};
use crate::report::{Aggregator, RunReport};
use crate::scan;
use crate::scheduler::Scheduler;

/// Operating flags for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFlags {
    pub mode: SyncMode,
    pub jobs: usize,
    pub repo_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub max_depth: usize,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            mode: SyncMode::default(),
            jobs: num_cpus::get().max(1),
            repo_timeout: Duration::from_secs(300),
            run_timeout: None,
            max_depth: 3,
        }
    }
}

pub struct Engine {
    git: Arc<dyn GitPort>,
    hosting: Option<Arc<dyn HostingPort>>,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(git: Arc<dyn GitPort>, hosting: Option<Arc<dyn HostingPort>>) -> Self {
        Self {
            git,
            hosting,
            cancel: CancelToken::new(),
        }
    }

    /// Engine using the `git` binary and, when installed, the `gh` CLI.
    pub fn system(protocol: CloneProtocol) -> Self {
        let hosting = GhCli::detect(protocol).map(|gh| Arc::new(gh) as Arc<dyn HostingPort>);
        Self::new(Arc::new(GitCli::new()), hosting)
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn has_hosting(&self) -> bool {
        self.hosting.is_some()
    }

    /// Sync every repository under `roots` plus `declared`, and report.
    pub fn run(&self, roots: &[PathBuf], declared: &[DeclaredRepo], flags: &SyncFlags) -> RunReport {
        let started = Instant::now();
        let roots = dedup_paths(roots.iter().cloned());

        let discovery = scan::locate(&roots, declared, flags.max_depth);
        info!(
            "discovered {} repositories in {} roots ({} missing roots)",
            discovery.descriptors.len(),
            roots.len(),
            discovery.missing_roots.len()
        );

        let descriptors = discovery.descriptors;
        let mut aggregator = Aggregator::new(descriptors.clone());
        let executor = Executor::new(self.git.clone(), self.hosting.clone(), flags.mode);
        let scheduler = Scheduler::new(flags.jobs, flags.repo_timeout)
            .with_run_timeout(flags.run_timeout)
            .with_cancel(self.cancel.clone());

        let timed_out = scheduler.run(
            &descriptors,
            |repo, ctx| executor.execute(repo, ctx),
            |index, outcome| aggregator.record(index, outcome),
        );

        let interrupted = self.cancel.is_cancelled() && !timed_out;
        if interrupted {
            warn!("run interrupted");
        }
        aggregator.finish(roots, discovery.missing_roots, started.elapsed(), interrupted)
    }

    /// Repositories of the hosting account, declared under `root`. Lookup failures are logged and yield nothing.
    pub fn hosted_repos(&self, root: &Path, owner: Option<&str>, limit: usize, timeout: Duration) -> Vec<DeclaredRepo> {
        let Some(hosting) = &self.hosting else {
            warn!("GitHub listing requested but `gh` is not available");
            return Vec::new();
        };
        let ctx = OpContext::new(timeout, self.cancel.clone());
        match hosting.list_repositories(owner, limit, &ctx) {
            Ok(repos) => {
                info!("hosting lists {} repositories", repos.len());
                repos
                    .into_iter()
                    .map(|repo| DeclaredRepo {
                        path: root.join(&repo.name),
                        url: Some(repo.clone_url),
                    })
                    .collect()
            }
            Err(e) => {
                warn!("failed to list hosted repositories: {}", e);
                Vec::new()
            }
        }
    }
}

/// Sync `roots` with the system git and optional GitHub CLI.
pub fn run(roots: &[PathBuf], flags: &SyncFlags) -> RunReport {
    Engine::system(CloneProtocol::default()).run(roots, &[], flags)
}
