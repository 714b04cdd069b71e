use std::collections::HashSet;

use halyard_core::{Manifest, Presence, ResourceAddr};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::diff::{diff, drift, DiffRules, FieldDrift, PlannedAction};
use crate::error::{FailureReason, ProvisionerError, RemoteError};
use crate::graph::DependencyGraph;
use crate::resolve::Resolver;
use crate::retry::with_retry;

/// Why an entry has the action it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    FirstProvision,
    Drift,
    InSync,
    Teardown,
    /// In state but no longer declared.
    Orphaned,
    /// Depends on values that only exist once a dependency is applied.
    PendingDependency,
}

/// One annotated line of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub addr: ResourceAddr,
    pub action: PlannedAction,
    pub cause: Cause,
    pub drift: Vec<FieldDrift>,
    /// Field paths holding references that can't be resolved yet.
    pub pending_references: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| !e.action.is_noop())
    }

    pub fn get(&self, addr: &ResourceAddr) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.addr == addr)
    }
}

/// Read every declared instance and diff it against desired state without
/// changing anything, in execution order, followed by orphans.
pub async fn plan(ctx: &RunContext, manifest: &Manifest) -> Result<Plan, ProvisionerError> {
    let graph = DependencyGraph::build(manifest)?;
    let resolver = Resolver::new(manifest, &ctx.store);
    let mut entries = Vec::new();

    for addr in graph.execution_order() {
        let Some(instance) = manifest.get(&addr) else {
            continue;
        };
        let schema = ctx.schemas.get(&addr.resource_type)?;
        let partial = resolver.resolve_partial(instance);
        let pending_references: Vec<String> =
            partial.pending.iter().map(|(path, _)| path.clone()).collect();
        let desired = schema.validate(&partial.attributes)?;

        // Parent not created yet: the object can't exist either.
        let (Ok(scope), Ok(name)) = (schema.scope(&desired), schema.remote_name(&desired)) else {
            let action = match instance.presence {
                Presence::Present => PlannedAction::Create,
                Presence::Absent => PlannedAction::NoOp,
            };
            entries.push(PlanEntry {
                addr,
                action,
                cause: Cause::PendingDependency,
                drift: vec![],
                pending_references,
            });
            continue;
        };

        let client = &*ctx.client;
        let (scope, name) = (&scope, name.as_str());
        let mut retries = 0;
        let observed = with_retry(
            &ctx.settings.retry,
            &ctx.cancel,
            &addr,
            "get",
            &mut retries,
            move || client.get(scope, name),
        )
        .await
        .map_err(into_provisioner_error)?;

        let rules = DiffRules {
            schema,
            ignore_changes: &instance.ignore_changes,
        };
        let action = diff(rules, instance.presence, &desired, observed.as_ref());
        let drift = match (&action, &observed) {
            (PlannedAction::Update { .. }, Some(observed)) => drift(rules, &desired, observed),
            _ => vec![],
        };
        let cause = match (&action, instance.presence) {
            (_, Presence::Absent) => Cause::Teardown,
            (PlannedAction::NoOp, _) => Cause::InSync,
            _ if !pending_references.is_empty() => Cause::PendingDependency,
            (PlannedAction::Create, _) => Cause::FirstProvision,
            _ => Cause::Drift,
        };

        tracing::debug!(addr = %addr, action = %action, cause = ?cause, "planned");
        entries.push(PlanEntry {
            addr,
            action,
            cause,
            drift,
            pending_references,
        });
    }

    let declared: HashSet<ResourceAddr> = manifest.addrs().into_iter().collect();
    for addr in ctx.store.addrs() {
        if !declared.contains(&addr) {
            entries.push(PlanEntry {
                addr,
                action: PlannedAction::Delete,
                cause: Cause::Orphaned,
                drift: vec![],
                pending_references: vec![],
            });
        }
    }

    let plan = Plan { entries };
    tracing::info!(
        entries = plan.entries.len(),
        changes = plan.has_changes(),
        "plan computed"
    );
    Ok(plan)
}

fn into_provisioner_error(reason: FailureReason) -> ProvisionerError {
    match reason {
        FailureReason::Remote(e) => e.into(),
        FailureReason::TransientExhausted { last, .. } => RemoteError::Transient(last).into(),
        FailureReason::Validation(e) => e.into(),
        _ => ProvisionerError::Cancelled,
    }
}
