//! git-msync - keep many local Git working trees in sync with their remotes.
//!
//! Discovery finds working trees under the configured roots, a bounded
//! worker pool fetches and fast-forwards each one through the `GitPort`
//! capability, and the aggregator folds the per-repository outcomes into a
//! `RunReport` with a stable, discovery-ordered rendering.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod git;
pub mod github;
pub mod ports;
pub mod process;
pub mod report;
pub mod scan;
pub mod scheduler;

// Re-exports for ergonomics
pub use domain::*;
pub use engine::{Engine, SyncFlags, run};
pub use error::{MissingRoot, SyncError};
pub use report::{Overall, RunReport};
