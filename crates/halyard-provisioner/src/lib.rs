//! halyard-provisioner
//!
//! Reconciliation engine: diffs declared resource instances against what a
//! remote control plane reports and drives create/update/delete calls until
//! the two agree.
//!
//! Public API:
//! - `plan()`: read every instance and report what would change
//! - `apply()`: reconcile a manifest in dependency order, then delete orphans
//! - `destroy()`: tear down every instance of a manifest, dependents first
//! - `verify::{expect_exists, expect_destroyed}`: independent remote checks

pub mod cancel;
pub mod context;
pub mod diff;
pub mod error;
pub mod graph;
pub mod persistence;
pub mod plan;
pub mod reconcile;
pub mod remote;
pub mod resolve;
pub mod retry;
pub mod settings;
pub mod state;
pub mod summary;
pub mod verify;

use halyard_core::Manifest;

pub use crate::cancel::CancelToken;
pub use crate::context::RunContext;
pub use crate::diff::{FieldDrift, PlannedAction};
pub use crate::error::{FailureReason, GraphError, ProvisionerError, RemoteError};
pub use crate::graph::DependencyGraph;
pub use crate::persistence::StatePersistence;
pub use crate::plan::{plan, Cause, Plan, PlanEntry};
pub use crate::remote::{BoxFuture, RemoteClient};
pub use crate::retry::RetryPolicy;
pub use crate::settings::{load_settings, EngineSettings};
pub use crate::state::{ObservedState, ResourceState, ResourceStatus, StateSnapshot, StateStore};
pub use crate::summary::{ConvergenceResult, Outcome, RunOutcome, RunSummary};
pub use crate::verify::{expect_destroyed, expect_exists, VerifyError};

/// Converge the remote to `manifest`.
pub async fn apply(ctx: &RunContext, manifest: &Manifest) -> Result<RunOutcome, ProvisionerError> {
    reconcile::reconcile(ctx, manifest).await
}

/// Delete every instance `manifest` declares, plus any orphans in state.
pub async fn destroy(
    ctx: &RunContext,
    manifest: &Manifest,
) -> Result<RunOutcome, ProvisionerError> {
    tracing::info!(instances = manifest.len(), "destroying manifest");
    reconcile::reconcile(ctx, &manifest.teardown()).await
}
