use crossbeam_channel::{after, bounded, select, unbounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cancel::{CancelToken, OpContext};
use crate::domain::{RepositoryDescriptor, SyncOutcome};

/// Fixed-size worker pool over a shared queue of descriptors.
///
/// Each descriptor is dispatched exactly once and yields exactly one
/// outcome, including when the run is cancelled before it starts or its
/// processing panics.
#[derive(Debug, Clone)]
pub struct Scheduler {
    jobs: usize,
    repo_timeout: Duration,
    run_timeout: Option<Duration>,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(jobs: usize, repo_timeout: Duration) -> Self {
        Self {
            jobs: jobs.max(1),
            repo_timeout,
            run_timeout: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `work` over every descriptor. `on_outcome` is called on the
    /// calling thread, in completion order, with the descriptor's index.
    /// Returns true when the run timeout fired.
    pub fn run<W, O>(&self, repos: &[RepositoryDescriptor], work: W, mut on_outcome: O) -> bool
    where
        W: Fn(&RepositoryDescriptor, &OpContext) -> SyncOutcome + Sync,
        O: FnMut(usize, SyncOutcome),
    {
        if repos.is_empty() {
            return false;
        }

        let (work_tx, work_rx) = unbounded();
        for item in repos.iter().enumerate() {
            // Receiver is alive until the workers finish
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let (out_tx, out_rx) = unbounded::<(usize, SyncOutcome)>();
        let (done_tx, done_rx) = bounded::<()>(0);
        let timed_out = AtomicBool::new(false);
        let workers = self.jobs.min(repos.len());
        debug!("dispatching {} repositories to {} workers", repos.len(), workers);

        thread::scope(|s| {
            if let Some(limit) = self.run_timeout {
                let cancel = self.cancel.clone();
                let done_rx = done_rx.clone();
                let timed_out = &timed_out;
                s.spawn(move || {
                    select! {
                        recv(done_rx) -> _ => {}
                        recv(after(limit)) -> _ => {
                            warn!("run timeout of {:?} reached, cancelling", limit);
                            timed_out.store(true, Ordering::SeqCst);
                            cancel.cancel();
                        }
                    }
                });
            }

            for worker in 0..workers {
                let work_rx = work_rx.clone();
                let out_tx = out_tx.clone();
                let work = &work;
                s.spawn(move || {
                    for (index, repo) in work_rx.iter() {
                        let outcome = self.process(worker, repo, work);
                        if out_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(out_tx);

            for (index, outcome) in out_rx.iter() {
                on_outcome(index, outcome);
            }
            drop(done_tx);
        });

        timed_out.into_inner()
    }

    fn process<W>(&self, worker: usize, repo: &RepositoryDescriptor, work: &W) -> SyncOutcome
    where
        W: Fn(&RepositoryDescriptor, &OpContext) -> SyncOutcome + Sync,
    {
        if self.cancel.is_cancelled() {
            return SyncOutcome::error(repo.clone(), "cancelled");
        }

        debug!(worker, repo = %repo.name, "start");
        let ctx = OpContext::new(self.repo_timeout, self.cancel.clone());
        match panic::catch_unwind(AssertUnwindSafe(|| work(repo, &ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("worker {} panicked on {}: {}", worker, repo.path.display(), message);
                SyncOutcome::error(repo.clone(), format!("internal error: {message}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
