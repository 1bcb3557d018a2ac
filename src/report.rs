use console::{Style, style};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error};

use crate::domain::{RepositoryDescriptor, SyncOutcome, SyncStatus};
use crate::error::MissingRoot;

/// Phrase printed when discovery finds nothing. Scripts match on it.
pub const NO_REPOSITORIES_FOUND: &str = "No Git repositories found";

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL_FAILURE: i32 = 1;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    Success,
    PartialFailure,
    NoRepositoriesFound,
}

impl Overall {
    pub fn label(self) -> &'static str {
        match self {
            Overall::Success => "success",
            Overall::PartialFailure => "partial-failure",
            Overall::NoRepositoriesFound => "no-repositories-found",
        }
    }
}

/// Final, read-only result of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub roots: Vec<PathBuf>,
    pub missing_roots: Vec<MissingRoot>,
    /// In discovery order
    pub outcomes: Vec<SyncOutcome>,
    pub counts: BTreeMap<SyncStatus, usize>,
    pub duration: Duration,
    pub overall: Overall,
    pub interrupted: bool,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn count(&self, status: SyncStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn outcome_for(&self, name: &str) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.descriptor.name == name)
    }

    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return EXIT_INTERRUPTED;
        }
        match self.overall {
            Overall::Success | Overall::NoRepositoriesFound => EXIT_SUCCESS,
            Overall::PartialFailure => EXIT_PARTIAL_FAILURE,
        }
    }

    /// Terminal text: one line per repository and missing root, then a summary line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let width = self
            .outcomes
            .iter()
            .map(|o| o.descriptor.name.chars().count())
            .max()
            .unwrap_or(0);

        for missing in &self.missing_roots {
            let _ = writeln!(
                out,
                "{} {:<14} {}  {}",
                style("✗").red().bold(),
                "missing-root",
                missing.path.display(),
                style(&missing.reason).dim()
            );
        }

        for outcome in &self.outcomes {
            let status_style = status_style(outcome.status);
            let _ = write!(
                out,
                "{} {:<14} {:<width$}",
                status_style.apply_to(glyph(outcome.status)),
                status_style.apply_to(outcome.status.label()),
                outcome.descriptor.name,
            );
            if let Some(detail) = &outcome.detail {
                let _ = write!(out, "  {}", style(detail).dim());
            }
            out.push('\n');
        }

        if self.overall == Overall::NoRepositoriesFound {
            let roots: Vec<String> = self.roots.iter().map(|r| r.display().to_string()).collect();
            if roots.is_empty() {
                let _ = writeln!(out, "{NO_REPOSITORIES_FOUND} (no root paths configured).");
            } else {
                let _ = writeln!(out, "{NO_REPOSITORIES_FOUND} in: {}", roots.join(", "));
            }
            return out;
        }

        let breakdown: Vec<String> = SyncStatus::ALL
            .iter()
            .filter(|s| self.count(**s) > 0)
            .map(|s| format!("{} {}", self.count(*s), s.label()))
            .collect();
        let noun = if self.total() == 1 { "repository" } else { "repositories" };
        let _ = write!(
            out,
            "{} {} {} in {:.1}s: {}",
            style(self.overall.label()).bold(),
            self.total(),
            noun,
            self.duration.as_secs_f64(),
            breakdown.join(", ")
        );
        if self.interrupted {
            let _ = write!(out, " (interrupted)");
        }
        out.push('\n');
        out
    }
}

fn glyph(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::UpToDate => "✓",
        SyncStatus::FastForwarded => "↓",
        SyncStatus::Cloned => "+",
        SyncStatus::DirtySkipped => "●",
        SyncStatus::Conflict => "⇅",
        SyncStatus::Error => "✗",
    }
}

fn status_style(status: SyncStatus) -> Style {
    match status {
        SyncStatus::UpToDate => Style::new().green(),
        SyncStatus::FastForwarded | SyncStatus::Cloned => Style::new().cyan().bold(),
        SyncStatus::DirtySkipped => Style::new().yellow(),
        SyncStatus::Conflict | SyncStatus::Error => Style::new().red().bold(),
    }
}

/// Collects outcomes as workers finish and builds the `RunReport`.
#[derive(Debug)]
pub struct Aggregator {
    descriptors: Vec<RepositoryDescriptor>,
    slots: Vec<Option<SyncOutcome>>,
    counts: BTreeMap<SyncStatus, usize>,
}

impl Aggregator {
    pub fn new(descriptors: Vec<RepositoryDescriptor>) -> Self {
        let slots = vec![None; descriptors.len()];
        Self {
            descriptors,
            slots,
            counts: BTreeMap::new(),
        }
    }

    /// Record the outcome for descriptor `index`. A second outcome for the same index is dropped.
    pub fn record(&mut self, index: usize, outcome: SyncOutcome) {
        let Some(slot) = self.slots.get_mut(index) else {
            error!("outcome for unknown repository index {}", index);
            return;
        };
        if slot.is_some() {
            error!("duplicate outcome for {}", outcome.descriptor.path.display());
            return;
        }
        debug!("{} finished: {} in {:?}", outcome.descriptor.name, outcome.status, outcome.duration);
        *self.counts.entry(outcome.status).or_insert(0) += 1;
        *slot = Some(outcome);
    }

    pub fn finish(
        self,
        roots: Vec<PathBuf>,
        missing_roots: Vec<MissingRoot>,
        duration: Duration,
        interrupted: bool,
    ) -> RunReport {
        let mut counts = self.counts;
        let outcomes: Vec<SyncOutcome> = self
            .slots
            .into_iter()
            .zip(self.descriptors)
            .map(|(slot, descriptor)| {
                slot.unwrap_or_else(|| {
                    error!("no outcome recorded for {}", descriptor.path.display());
                    *counts.entry(SyncStatus::Error).or_insert(0) += 1;
                    SyncOutcome::error(descriptor, "no outcome recorded")
                })
            })
            .collect();

        let overall = overall_result(&outcomes);
        RunReport {
            roots,
            missing_roots,
            outcomes,
            counts,
            duration,
            overall,
            interrupted,
        }
    }
}

pub fn overall_result(outcomes: &[SyncOutcome]) -> Overall {
    if outcomes.is_empty() {
        Overall::NoRepositoriesFound
    } else if outcomes.iter().any(|o| o.status.is_failure()) {
        Overall::PartialFailure
    } else {
        Overall::Success
    }
}
