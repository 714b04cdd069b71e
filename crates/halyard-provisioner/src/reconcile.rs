//! Drives every instance of a manifest to its desired state.
//!
//! The scheduler spawns one worker per instance once everything it waits on
//! has converged. Each worker walks
//! `Planning → Executing → Verifying → Converged | Failed` on its own and
//! reports a [`ConvergenceResult`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use halyard_core::{
    Attributes, Manifest, Presence, ResourceAddr, ResourceInstance, ResourceSchema, Scope, Value,
};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::context::RunContext;
use crate::diff::{diff, drift, update_delta, DiffRules, FieldDrift, PlannedAction};
use crate::error::{FailureReason, ProvisionerError, RemoteError};
use crate::graph::DependencyGraph;
use crate::resolve::Resolver;
use crate::retry::{backoff, with_retry};
use crate::state::{ObservedState, ResourceState, ResourceStatus};
use crate::summary::{ConvergenceResult, Outcome, RunOutcome, RunSummary};

/// Reconcile `manifest`, then delete stored instances it no longer declares.
///
/// Graph errors abort the run before any remote call and are returned as
/// [`RunOutcome::Aborted`]. `Err` is reserved for infrastructure failures
/// such as an unwritable state file.
pub async fn reconcile(
    ctx: &RunContext,
    manifest: &Manifest,
) -> Result<RunOutcome, ProvisionerError> {
    ctx.settings.validate()?;

    let graph = match DependencyGraph::build(manifest) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::error!(error = %e, "configuration rejected, nothing was changed");
            return Ok(RunOutcome::Aborted(e));
        }
    };

    let _timer = ctx.settings.run_timeout().map(|timeout| {
        let cancel = ctx.cancel.clone();
        AbortOnDrop(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!(?timeout, "run timeout reached, cancelling");
            cancel.cancel();
        }))
    });

    tracing::info!(instances = manifest.len(), "reconciling manifest");
    let mut summary = RunSummary::default();

    let declared = Arc::new(manifest.clone());
    let work: Vec<WorkItem> = graph
        .execution_order()
        .into_iter()
        .filter_map(|addr| manifest.get(&addr))
        .map(|instance| WorkItem {
            instance: instance.clone(),
            depends_on: instance.dependencies(),
        })
        .collect();
    schedule(ctx, &declared, work, graph.predecessors(), &mut summary).await?;

    if !ctx.cancel.is_cancelled() {
        delete_orphans(ctx, manifest, &mut summary).await?;
    }

    let converged = summary.converged().count();
    let failed = summary.failed().count();
    let blocked = summary.blocked().count();
    if failed == 0 && blocked == 0 {
        tracing::info!(converged, "all resources converged");
    } else {
        tracing::warn!(converged, failed, blocked, "run finished with failures");
    }

    Ok(RunOutcome::from_summary(summary))
}

/// Stored instances the manifest no longer declares, deleted dependents
/// first using the dependency lists recorded when they were reconciled.
async fn delete_orphans(
    ctx: &RunContext,
    manifest: &Manifest,
    summary: &mut RunSummary,
) -> Result<(), ProvisionerError> {
    let declared: HashSet<ResourceAddr> = manifest.addrs().into_iter().collect();
    let orphans: Vec<ResourceState> = ctx
        .store
        .snapshot()
        .resources
        .into_iter()
        .filter(|r| !declared.contains(&r.addr))
        .collect();
    if orphans.is_empty() {
        return Ok(());
    }
    tracing::info!(count = orphans.len(), "deleting resources no longer declared");

    let orphan_addrs: HashSet<ResourceAddr> = orphans.iter().map(|r| r.addr.clone()).collect();
    let mut preds: HashMap<ResourceAddr, Vec<ResourceAddr>> = HashMap::new();
    for orphan in &orphans {
        for dep in orphan.depends_on.iter().filter(|d| orphan_addrs.contains(*d)) {
            preds.entry(dep.clone()).or_default().push(orphan.addr.clone());
        }
    }

    let work: Vec<WorkItem> = orphans
        .into_iter()
        .map(|r| WorkItem {
            instance: ResourceInstance {
                addr: r.addr,
                attributes: r.declared,
                presence: Presence::Absent,
                ignore_changes: Vec::new(),
            },
            depends_on: r.depends_on,
        })
        .collect();
    let resolve_from = Arc::new(Manifest::new(
        work.iter().map(|w| w.instance.clone()).collect(),
    ));

    schedule(ctx, &resolve_from, work, preds, summary).await
}

struct WorkItem {
    instance: ResourceInstance,
    depends_on: Vec<ResourceAddr>,
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `work` (listed in execution order) on a bounded worker pool.
///
/// An item is spawned only once every address in its `preds` entry has
/// converged. When an item fails, everything transitively waiting on it is
/// reported `Blocked` and never spawned. State is flushed after each result.
async fn schedule(
    ctx: &RunContext,
    resolve_from: &Arc<Manifest>,
    work: Vec<WorkItem>,
    preds: HashMap<ResourceAddr, Vec<ResourceAddr>>,
    summary: &mut RunSummary,
) -> Result<(), ProvisionerError> {
    let addrs: Vec<ResourceAddr> = work.iter().map(|w| w.instance.addr.clone()).collect();
    let position: HashMap<ResourceAddr, usize> = addrs
        .iter()
        .enumerate()
        .map(|(i, a)| (a.clone(), i))
        .collect();

    let mut waiting: HashMap<ResourceAddr, usize> = HashMap::new();
    let mut successors: HashMap<ResourceAddr, Vec<ResourceAddr>> = HashMap::new();
    for addr in &addrs {
        let deps = preds.get(addr).map(Vec::as_slice).unwrap_or_default();
        waiting.insert(addr.clone(), deps.len());
        for dep in deps {
            successors.entry(dep.clone()).or_default().push(addr.clone());
        }
    }

    let mut ready: BTreeSet<usize> = addrs
        .iter()
        .enumerate()
        .filter(|(_, a)| waiting.get(*a) == Some(&0))
        .map(|(i, _)| i)
        .collect();
    let mut pending: HashMap<ResourceAddr, WorkItem> = work
        .into_iter()
        .map(|w| (w.instance.addr.clone(), w))
        .collect();

    let semaphore = Arc::new(Semaphore::new(ctx.settings.concurrency));
    let mut workers = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, ResourceAddr> = HashMap::new();

    loop {
        while let Some(next) = ready.pop_first() {
            let Some(item) = pending.remove(&addrs[next]) else {
                continue;
            };
            let addr = item.instance.addr.clone();
            if ctx.cancel.is_cancelled() {
                summary
                    .results
                    .push(ConvergenceResult::failed(addr, FailureReason::Cancelled));
                continue;
            }

            let worker = Worker {
                ctx: ctx.clone(),
                resolve_from: Arc::clone(resolve_from),
                instance: item.instance,
                depends_on: item.depends_on,
            };
            let semaphore = Arc::clone(&semaphore);
            let span = tracing::info_span!("reconcile", addr = %addr);
            let handle = workers.spawn(
                async move {
                    // The semaphore is never closed, so this always holds a permit.
                    let _permit = semaphore.acquire_owned().await;
                    worker.run().await
                }
                .instrument(span),
            );
            running.insert(handle.id(), addr);
        }

        let Some(joined) = workers.join_next_with_id().await else {
            break;
        };
        let result = match joined {
            Ok((id, result)) => {
                running.remove(&id);
                result
            }
            Err(e) => {
                let Some(addr) = running.remove(&e.id()) else {
                    continue;
                };
                tracing::error!(addr = %addr, error = %e, "worker terminated without a result");
                ConvergenceResult::failed(addr, FailureReason::WorkerLost)
            }
        };
        ctx.flush().await?;

        let unblocked = successors.get(&result.addr).cloned().unwrap_or_default();
        if result.is_converged() {
            for succ in unblocked {
                if let Some(count) = waiting.get_mut(&succ) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        if let Some(&pos) = position.get(&succ) {
                            ready.insert(pos);
                        }
                    }
                }
            }
            summary.results.push(result);
        } else if matches!(result.outcome, Outcome::Failed(FailureReason::Cancelled)) {
            // Waiting instances are reported cancelled below.
            summary.results.push(result);
        } else {
            let root = match &result.outcome {
                Outcome::Blocked { by } => by.clone(),
                _ => result.addr.clone(),
            };
            summary.results.push(result);

            let mut stack = unblocked;
            while let Some(succ) = stack.pop() {
                if pending.remove(&succ).is_none() {
                    continue;
                }
                tracing::warn!(addr = %succ, blocked_by = %root, "skipping, upstream resource failed");
                stack.extend(successors.get(&succ).cloned().unwrap_or_default());
                summary
                    .results
                    .push(ConvergenceResult::blocked(succ, root.clone()));
            }
        }
    }

    // Anything left never became ready: its predecessors were cancelled.
    let mut leftover: Vec<ResourceAddr> = pending.into_keys().collect();
    leftover.sort_by_key(|a| position[a]);
    for addr in leftover {
        let reason = if ctx.cancel.is_cancelled() {
            FailureReason::Cancelled
        } else {
            tracing::error!(addr = %addr, "instance was never scheduled");
            FailureReason::WorkerLost
        };
        summary.results.push(ConvergenceResult::failed(addr, reason));
    }
    Ok(())
}

/// Reconciles a single instance.
struct Worker {
    ctx: RunContext,
    /// Instances references are resolved against.
    resolve_from: Arc<Manifest>,
    instance: ResourceInstance,
    depends_on: Vec<ResourceAddr>,
}

#[derive(Default)]
struct Progress {
    retries: u32,
    action: Option<PlannedAction>,
    desired: Option<Attributes>,
    observed: Option<ObservedState>,
}

impl Worker {
    async fn run(self) -> ConvergenceResult {
        let mut progress = Progress::default();
        let outcome = match self.converge(&mut progress).await {
            Ok(()) => Outcome::Converged,
            Err(reason) => {
                tracing::error!(error = %reason, "resource failed");
                self.record_failure(&progress, &reason);
                Outcome::Failed(reason)
            }
        };

        ConvergenceResult {
            addr: self.instance.addr.clone(),
            outcome,
            action: progress.action,
            retries: progress.retries,
            observed: progress.observed.map(|o| o.attributes),
        }
    }

    async fn converge(&self, p: &mut Progress) -> Result<(), FailureReason> {
        self.check_cancelled()?;
        let addr = &self.instance.addr;
        let presence = self.instance.presence;

        // Planning
        let schema = self.ctx.schemas.get(&addr.resource_type)?;
        let desired = self.desired(schema)?;
        let scope = schema.scope(&desired)?;
        let name = schema.remote_name(&desired)?;
        p.desired = Some(desired.clone());
        self.delete_moved(&scope, &name, p).await?;

        let rules = DiffRules {
            schema,
            ignore_changes: &self.instance.ignore_changes,
        };
        let mut current = self.observe(&scope, &name, p).await?;
        let mut action = diff(rules, presence, &desired, current.as_ref());
        p.action = Some(action.clone());
        tracing::debug!(phase = "planning", action = %action, "planned");

        if action.is_noop() {
            self.record_converged(ResourceStatus::InSync, &desired, p);
            return Ok(());
        }
        let mut status = ResourceStatus::Updated;

        let verify = &self.ctx.settings.verify;
        let mut attempt = 1;
        loop {
            tracing::debug!(phase = "executing", action = %action, attempt);
            self.execute(&action, &scope, &name, &desired, p).await?;
            p.action = Some(action.clone());
            if action == PlannedAction::Create {
                status = ResourceStatus::Created;
            }

            tracing::debug!(phase = "verifying", attempt);
            current = self.observe(&scope, &name, p).await?;
            if diff(rules, presence, &desired, current.as_ref()).is_noop() {
                break;
            }

            let remaining = self.remaining_drift(rules, &desired, &name, current.as_ref());
            if !verify.is_retryable(attempt) {
                return Err(FailureReason::DriftAfterRetryBudget {
                    attempts: attempt,
                    drift: remaining,
                });
            }
            let fields: Vec<&str> = remaining.iter().map(|d| d.field.as_str()).collect();
            tracing::warn!(attempt, drift = ?fields, "drift remains after {action}, backing off");
            if !backoff(verify, attempt, &self.ctx.cancel).await {
                return Err(FailureReason::Cancelled);
            }
            attempt += 1;
            p.retries += 1;

            current = self.observe(&scope, &name, p).await?;
            action = diff(rules, presence, &desired, current.as_ref());
            if action.is_noop() {
                break;
            }
        }

        self.record_converged(status, &desired, p);
        Ok(())
    }

    /// Resolved and validated desired attributes.
    ///
    /// Teardown tolerates references it cannot resolve as long as the
    /// remote scope and name can still be derived.
    fn desired(&self, schema: &ResourceSchema) -> Result<Attributes, FailureReason> {
        let resolver = Resolver::new(&self.resolve_from, &self.ctx.store);
        match self.instance.presence {
            Presence::Present => {
                let resolved = resolver.resolve(&self.instance)?;
                Ok(schema.validate_resolved(&resolved)?)
            }
            Presence::Absent => {
                let partial = resolver.resolve_partial(&self.instance);
                Ok(schema.validate(&partial.attributes)?)
            }
        }
    }

    async fn observe(
        &self,
        scope: &Scope,
        name: &str,
        p: &mut Progress,
    ) -> Result<Option<Attributes>, FailureReason> {
        let client = &*self.ctx.client;
        let current = with_retry(
            &self.ctx.settings.retry,
            &self.ctx.cancel,
            &self.instance.addr,
            "get",
            &mut p.retries,
            move || client.get(scope, name),
        )
        .await?;
        self.check_cancelled()?;

        p.observed = current.clone().map(|attributes| ObservedState {
            addr: self.instance.addr.clone(),
            scope: scope.clone(),
            name: name.to_string(),
            attributes,
            observed_at: jiff::Timestamp::now(),
        });
        Ok(current)
    }

    async fn execute(
        &self,
        action: &PlannedAction,
        scope: &Scope,
        name: &str,
        desired: &Attributes,
        p: &mut Progress,
    ) -> Result<(), FailureReason> {
        let addr = &self.instance.addr;
        let retry = &self.ctx.settings.retry;
        let cancel = &self.ctx.cancel;
        let client = &*self.ctx.client;

        match action {
            PlannedAction::Create => {
                tracing::info!(addr = %addr, scope = %scope, "creating resource");
                with_retry(retry, cancel, addr, "create", &mut p.retries, move || {
                    client.create(scope, name, desired)
                })
                .await?;
            }
            PlannedAction::Update { changed } => {
                let delta = update_delta(desired, changed);
                let delta = &delta;
                tracing::info!(addr = %addr, changed = ?changed, "updating resource");
                let updated = with_retry(retry, cancel, addr, "update", &mut p.retries, move || {
                    client.update(scope, name, delta)
                })
                .await;
                match updated {
                    Ok(_) => {}
                    // Verification sees it missing and recreates it.
                    Err(FailureReason::Remote(RemoteError::NotFound(_))) => {
                        tracing::warn!(addr = %addr, "resource vanished before update");
                    }
                    Err(e) => return Err(e),
                }
            }
            PlannedAction::Delete => {
                tracing::info!(addr = %addr, scope = %scope, "deleting resource");
                let deleted = with_retry(retry, cancel, addr, "delete", &mut p.retries, move || {
                    client.delete(scope, name)
                })
                .await;
                match deleted {
                    Ok(()) | Err(FailureReason::Remote(RemoteError::NotFound(_))) => {}
                    Err(e) => return Err(e),
                }
            }
            PlannedAction::NoOp => {}
        }

        // The call has completed, but a cancelled run discards its result.
        self.check_cancelled()
    }

    /// Delete the object recorded under a previous scope or name.
    ///
    /// A changed scope or name addresses a different remote object, so the
    /// old one would otherwise be left behind untracked.
    async fn delete_moved(
        &self,
        scope: &Scope,
        name: &str,
        p: &mut Progress,
    ) -> Result<(), FailureReason> {
        let addr = &self.instance.addr;
        let Some(previous) = self.ctx.store.observed(addr) else {
            return Ok(());
        };
        if previous.scope == *scope && previous.name == name {
            return Ok(());
        }

        tracing::info!(
            addr = %addr,
            old_scope = %previous.scope,
            old_name = %previous.name,
            "remote identity changed, deleting previous object"
        );
        let client = &*self.ctx.client;
        let (old_scope, old_name) = (&previous.scope, previous.name.as_str());
        let deleted = with_retry(
            &self.ctx.settings.retry,
            &self.ctx.cancel,
            addr,
            "delete",
            &mut p.retries,
            move || client.delete(old_scope, old_name),
        )
        .await;
        match deleted {
            Ok(()) | Err(FailureReason::Remote(RemoteError::NotFound(_))) => self.check_cancelled(),
            Err(e) => Err(e),
        }
    }

    /// Drift to report when verification keeps failing.
    fn remaining_drift(
        &self,
        rules: DiffRules<'_>,
        desired: &Attributes,
        name: &str,
        current: Option<&Attributes>,
    ) -> Vec<FieldDrift> {
        let name_field = rules.schema.name_field.clone();
        match (self.instance.presence, current) {
            (Presence::Present, Some(observed)) => drift(rules, desired, observed),
            (Presence::Present, None) => vec![FieldDrift {
                field: name_field,
                expected: Some(Value::from(name)),
                actual: None,
            }],
            (Presence::Absent, Some(_)) => vec![FieldDrift {
                field: name_field,
                expected: None,
                actual: Some(Value::from(name)),
            }],
            (Presence::Absent, None) => Vec::new(),
        }
    }

    fn check_cancelled(&self) -> Result<(), FailureReason> {
        if self.ctx.cancel.is_cancelled() {
            Err(FailureReason::Cancelled)
        } else {
            Ok(())
        }
    }

    fn record_converged(&self, status: ResourceStatus, desired: &Attributes, p: &Progress) {
        let addr = &self.instance.addr;
        if self.instance.is_absent() {
            if self.ctx.store.remove(addr).is_some() {
                tracing::debug!(addr = %addr, "removed from state");
            }
            tracing::info!(addr = %addr, "resource absent");
            return;
        }

        tracing::info!(addr = %addr, status = ?status, retries = p.retries, "resource converged");
        self.ctx.store.upsert(ResourceState {
            addr: addr.clone(),
            status,
            declared: desired.clone(),
            observed: p.observed.clone(),
            depends_on: self.depends_on.clone(),
        });
    }

    /// Keep whatever exists remotely in state so a later run can find it.
    fn record_failure(&self, p: &Progress, reason: &FailureReason) {
        if matches!(reason, FailureReason::Cancelled) {
            return;
        }
        let (Some(desired), Some(observed)) = (&p.desired, &p.observed) else {
            return;
        };
        let status = match reason {
            FailureReason::DriftAfterRetryBudget { .. } => ResourceStatus::Drifted,
            _ => ResourceStatus::Failed,
        };
        self.ctx.store.upsert(ResourceState {
            addr: self.instance.addr.clone(),
            status,
            declared: desired.clone(),
            observed: Some(observed.clone()),
            depends_on: self.depends_on.clone(),
        });
    }
}
