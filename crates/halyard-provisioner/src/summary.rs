use halyard_core::{Attributes, ResourceAddr};

use crate::diff::PlannedAction;
use crate::error::{FailureReason, GraphError};

/// Terminal state of one instance in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Converged,
    Failed(FailureReason),
    /// Never attempted because `by` failed upstream.
    Blocked { by: ResourceAddr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceResult {
    pub addr: ResourceAddr,
    pub outcome: Outcome,
    /// Last action executed (or planned, if execution never started).
    pub action: Option<PlannedAction>,
    /// Transient retries plus verification re-executions.
    pub retries: u32,
    /// Final remote attributes, `None` if the object does not exist.
    pub observed: Option<Attributes>,
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self.outcome, Outcome::Converged)
    }

    pub(crate) fn blocked(addr: ResourceAddr, by: ResourceAddr) -> Self {
        Self {
            addr,
            outcome: Outcome::Blocked { by },
            action: None,
            retries: 0,
            observed: None,
        }
    }

    pub(crate) fn failed(addr: ResourceAddr, reason: FailureReason) -> Self {
        Self {
            addr,
            outcome: Outcome::Failed(reason),
            action: None,
            retries: 0,
            observed: None,
        }
    }
}

/// Per-instance results, in the order instances reached a terminal state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub results: Vec<ConvergenceResult>,
}

impl RunSummary {
    pub fn get(&self, addr: &ResourceAddr) -> Option<&ConvergenceResult> {
        self.results.iter().find(|r| &r.addr == addr)
    }

    pub fn all_converged(&self) -> bool {
        self.results.iter().all(ConvergenceResult::is_converged)
    }

    pub fn converged(&self) -> impl Iterator<Item = &ConvergenceResult> {
        self.results.iter().filter(|r| r.is_converged())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&ResourceAddr, &FailureReason)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Outcome::Failed(reason) => Some((&r.addr, reason)),
            _ => None,
        })
    }

    pub fn blocked(&self) -> impl Iterator<Item = (&ResourceAddr, &ResourceAddr)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            Outcome::Blocked { by } => Some((&r.addr, by)),
            _ => None,
        })
    }
}

/// Result of a whole apply or destroy run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every instance converged.
    Converged(RunSummary),
    /// At least one instance failed or was blocked.
    Partial(RunSummary),
    /// The configuration was rejected before any remote call.
    Aborted(GraphError),
}

impl RunOutcome {
    pub(crate) fn from_summary(summary: RunSummary) -> Self {
        if summary.all_converged() {
            Self::Converged(summary)
        } else {
            Self::Partial(summary)
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged(_))
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Converged(s) | Self::Partial(s) => Some(s),
            Self::Aborted(_) => None,
        }
    }
}
