//! halyard-automation
//!
//! Automation account resources for the reconciliation engine: schemas for
//! resource groups, automation accounts and runbooks, plus an in-memory
//! control plane that stands in for the management API.

pub mod control_plane;
pub mod runbook;
pub mod schema;

use std::sync::Arc;

use halyard_provisioner::RunContext;

pub use crate::control_plane::{MemoryControlPlane, ObjectKey, Operation};
pub use crate::runbook::{RunbookType, UnknownRunbookType};
pub use crate::schema::{registry, AUTOMATION_ACCOUNT, AUTOMATION_RUNBOOK, RESOURCE_GROUP};

/// Run context wired to `plane` with the automation schemas and default
/// settings.
pub fn run_context(plane: Arc<MemoryControlPlane>) -> RunContext {
    RunContext::new(plane, registry())
}
