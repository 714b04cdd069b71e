use halyard_core::{ResourceAddr, ValidationError};
use thiserror::Error;

use crate::diff::FieldDrift;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("run cancelled")]
    Cancelled,

    #[error("state error: {0}")]
    State(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal at graph-build time. Aborts the run before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", join_addrs(.cycle))]
    CycleDetected { cycle: Vec<ResourceAddr> },

    #[error("{from}: `{field}` references undeclared resource {target}")]
    DanglingReference {
        from: ResourceAddr,
        field: String,
        target: ResourceAddr,
    },

    #[error("duplicate resource instance: {0}")]
    DuplicateInstance(ResourceAddr),

    #[error("{from} is declared present but depends on {target}, which is declared absent")]
    AbsentDependency {
        from: ResourceAddr,
        target: ResourceAddr,
    },
}

/// Errors returned by a [`RemoteClient`](crate::remote::RemoteClient).
///
/// A missing object on `get` is `Ok(None)`, not an error. `NotFound` is only
/// returned by `update`/`delete` on an object that is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("remote rejected the request: {0}")]
    Rejected(String),

    #[error("remote object not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Why a single instance ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("transient errors persisted after {attempts} attempts: {last}")]
    TransientExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Remote(RemoteError),

    #[error("drift remains after {attempts} verification attempts: {}", join_drift(.drift))]
    DriftAfterRetryBudget { attempts: u32, drift: Vec<FieldDrift> },

    #[error("worker terminated before reporting a result")]
    WorkerLost,

    #[error("cancelled")]
    Cancelled,
}

fn join_addrs(addrs: &[ResourceAddr]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn join_drift(drift: &[FieldDrift]) -> String {
    drift
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
