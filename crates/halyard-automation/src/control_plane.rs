//! In-memory automation control plane.
//!
//! Behaves like the management API the reconciler talks to: objects live in
//! a parent hierarchy (resource group, automation account, runbook), children
//! cannot be created under a missing parent, deleting a parent removes its
//! children, and the remote side assigns ids and timestamps. Faults can be
//! injected per operation and resource type to exercise retry and drift
//! handling.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use halyard_core::{Attributes, Scope, Value};
use halyard_provisioner::{BoxFuture, RemoteClient, RemoteError};

use crate::schema::{AUTOMATION_ACCOUNT, AUTOMATION_RUNBOOK, RESOURCE_GROUP};

pub const DEFAULT_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Location of one remote object: its type plus scope path and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub resource_type: String,
    pub path: Vec<String>,
}

impl ObjectKey {
    pub fn new(resource_type: impl Into<String>, path: &[&str]) -> Self {
        Self {
            resource_type: resource_type.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn of(scope: &Scope, name: &str) -> Self {
        let mut path: Vec<String> = scope.path().into_iter().map(str::to_string).collect();
        path.push(name.to_string());
        Self {
            resource_type: scope.resource_type.clone(),
            path,
        }
    }

    fn parent(&self) -> Option<ObjectKey> {
        let parent_type = parent_type(&self.resource_type)?;
        let (_, parent_path) = self.path.split_last()?;
        Some(ObjectKey {
            resource_type: parent_type.to_string(),
            path: parent_path.to_vec(),
        })
    }

    /// True if `self` sits somewhere below `ancestor` in the hierarchy.
    fn is_below(&self, ancestor: &ObjectKey) -> bool {
        let mut current = self.parent();
        while let Some(key) = current {
            if &key == ancestor {
                return true;
            }
            current = key.parent();
        }
        false
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:/{}", self.resource_type, self.path.join("/"))
    }
}

fn parent_type(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        AUTOMATION_ACCOUNT => Some(RESOURCE_GROUP),
        AUTOMATION_RUNBOOK => Some(AUTOMATION_ACCOUNT),
        _ => None,
    }
}

fn is_supported(resource_type: &str) -> bool {
    matches!(
        resource_type,
        RESOURCE_GROUP | AUTOMATION_ACCOUNT | AUTOMATION_RUNBOOK
    )
}

#[derive(Debug, Default)]
struct Faults {
    transient: HashMap<(Operation, String), u32>,
    stale_reads: HashMap<String, u32>,
    sticky_deletes: HashSet<String>,
    overrides: HashMap<String, Attributes>,
    write_only: HashMap<String, Vec<String>>,
    rejected: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Attributes>,
    /// Version of each object before its most recent write. `None` means
    /// the object did not exist, so a stale read reports it missing.
    previous: HashMap<ObjectKey, Option<Attributes>>,
    /// Reads left that still see `previous` for a recently written object.
    lagging: HashMap<ObjectKey, u32>,
    faults: Faults,
    calls: Vec<String>,
    etag: u64,
}

#[derive(Debug)]
pub struct MemoryControlPlane {
    subscription_id: String,
    inner: Mutex<Inner>,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::with_subscription(DEFAULT_SUBSCRIPTION_ID)
    }

    pub fn with_subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored attributes, bypassing faults and write-only filtering.
    pub fn object(&self, resource_type: &str, path: &[&str]) -> Option<Attributes> {
        self.lock()
            .objects
            .get(&ObjectKey::new(resource_type, path))
            .cloned()
    }

    pub fn contains(&self, resource_type: &str, path: &[&str]) -> bool {
        self.object(resource_type, path).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls in order, formatted as `"<op> <type> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, op: Operation, resource_type: &str) -> usize {
        let prefix = format!("{op} {resource_type} ");
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The next `times` calls of `op` on `resource_type` fail transiently.
    pub fn fail_transiently(&self, op: Operation, resource_type: &str, times: u32) {
        self.lock()
            .faults
            .transient
            .insert((op, resource_type.to_string()), times);
    }

    /// After each write to an object of `resource_type`, the next `reads`
    /// gets of that object return the version before the write, as an
    /// eventually consistent read replica would.
    pub fn stale_reads(&self, resource_type: &str, reads: u32) {
        self.lock()
            .faults
            .stale_reads
            .insert(resource_type.to_string(), reads);
    }

    /// Deletes of `resource_type` are accepted but nothing is removed.
    pub fn sticky_deletes(&self, resource_type: &str) {
        self.lock()
            .faults
            .sticky_deletes
            .insert(resource_type.to_string());
    }

    /// Reads of `resource_type` report `value` for `field` whatever was
    /// written.
    pub fn override_field(&self, resource_type: &str, field: &str, value: impl Into<Value>) {
        self.lock()
            .faults
            .overrides
            .entry(resource_type.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
    }

    /// `field` is accepted on writes of `resource_type` but never returned
    /// by reads.
    pub fn write_only(&self, resource_type: &str, field: &str) {
        self.lock()
            .faults
            .write_only
            .entry(resource_type.to_string())
            .or_default()
            .push(field.to_string());
    }

    /// Creates and updates of `resource_type` fail with `reason`.
    pub fn reject(&self, resource_type: &str, reason: &str) {
        self.lock()
            .faults
            .rejected
            .insert(resource_type.to_string(), reason.to_string());
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    fn arm_id(&self, key: &ObjectKey) -> String {
        let group = format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id,
            key.path.first().map(String::as_str).unwrap_or_default()
        );
        match (key.resource_type.as_str(), key.path.as_slice()) {
            (AUTOMATION_ACCOUNT, [_, account]) => {
                format!("{group}/providers/Microsoft.Automation/automationAccounts/{account}")
            }
            (AUTOMATION_RUNBOOK, [_, account, runbook]) => format!(
                "{group}/providers/Microsoft.Automation/automationAccounts/{account}/runbooks/{runbook}"
            ),
            _ => group,
        }
    }

    /// Log the call and consume one injected transient failure, if any.
    fn enter(inner: &mut Inner, op: Operation, key: &ObjectKey) -> Result<(), RemoteError> {
        let name = key.path.last().map(String::as_str).unwrap_or_default();
        inner
            .calls
            .push(format!("{op} {} {name}", key.resource_type));
        tracing::debug!(op = %op, key = %key, "control plane call");

        if !is_supported(&key.resource_type) {
            return Err(RemoteError::Rejected(format!(
                "unsupported resource type `{}`",
                key.resource_type
            )));
        }
        if let Some(remaining) = inner
            .faults
            .transient
            .get_mut(&(op, key.resource_type.clone()))
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Transient(format!("{op} {key}: 429 too many requests")));
            }
        }
        Ok(())
    }

    fn check_writable(inner: &Inner, key: &ObjectKey) -> Result<(), RemoteError> {
        match inner.faults.rejected.get(&key.resource_type) {
            Some(reason) => Err(RemoteError::Rejected(format!("{key}: {reason}"))),
            None => Ok(()),
        }
    }

    /// What a read returns for a stored object.
    fn view(faults: &Faults, resource_type: &str, stored: &Attributes) -> Attributes {
        let mut attrs = stored.clone();
        if let Some(hidden) = faults.write_only.get(resource_type) {
            for field in hidden {
                attrs.remove(field);
            }
        }
        if let Some(overrides) = faults.overrides.get(resource_type) {
            attrs.extend(overrides.clone());
        }
        attrs
    }

    fn record_write(inner: &mut Inner, key: &ObjectKey, before: Option<Attributes>) {
        if let Some(reads) = inner.faults.stale_reads.get(&key.resource_type) {
            inner.lagging.insert(key.clone(), *reads);
        }
        inner.previous.insert(key.clone(), before);
    }

    fn next_etag(inner: &mut Inner) -> Value {
        inner.etag += 1;
        Value::from(format!("\"{}\"", inner.etag))
    }

    fn get_now(&self, scope: &Scope, name: &str) -> Result<Option<Attributes>, RemoteError> {
        let key = ObjectKey::of(scope, name);
        let mut inner = self.lock();
        Self::enter(&mut inner, Operation::Get, &key)?;

        let inner = &mut *inner;
        let stale = match inner.lagging.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        let stored = if stale {
            tracing::debug!(key = %key, "serving stale read");
            inner.previous.get(&key).cloned().flatten()
        } else {
            inner.objects.get(&key).cloned()
        };
        Ok(stored.map(|attrs| Self::view(&inner.faults, &key.resource_type, &attrs)))
    }

    fn create_now(
        &self,
        scope: &Scope,
        name: &str,
        attrs: &Attributes,
    ) -> Result<Attributes, RemoteError> {
        let key = ObjectKey::of(scope, name);
        let id = self.arm_id(&key);
        let mut inner = self.lock();
        Self::enter(&mut inner, Operation::Create, &key)?;
        Self::check_writable(&inner, &key)?;

        if let Some(parent) = key.parent() {
            if !inner.objects.contains_key(&parent) {
                return Err(RemoteError::Rejected(format!(
                    "cannot create {key}: parent {parent} does not exist"
                )));
            }
        }

        let now = Value::from(jiff::Timestamp::now().to_string());
        let existing = inner.objects.get(&key).cloned();
        let mut stored = attrs.clone();
        stored.insert("id".into(), id.into());
        if key.resource_type == AUTOMATION_RUNBOOK {
            let created = existing
                .as_ref()
                .and_then(|e| e.get("creation_time").cloned())
                .unwrap_or_else(|| now.clone());
            stored.insert("state".into(), "Published".into());
            stored.insert("creation_time".into(), created);
            stored.insert("last_modified_time".into(), now);
            stored.insert("etag".into(), Self::next_etag(&mut inner));
        }

        tracing::info!(key = %key, replaced = existing.is_some(), "object created");
        Self::record_write(&mut inner, &key, existing);
        inner.objects.insert(key.clone(), stored.clone());
        Ok(Self::view(&inner.faults, &key.resource_type, &stored))
    }

    fn update_now(
        &self,
        scope: &Scope,
        name: &str,
        delta: &Attributes,
    ) -> Result<Attributes, RemoteError> {
        let key = ObjectKey::of(scope, name);
        let mut inner = self.lock();
        Self::enter(&mut inner, Operation::Update, &key)?;
        Self::check_writable(&inner, &key)?;

        let Some(existing) = inner.objects.get(&key).cloned() else {
            return Err(RemoteError::NotFound(key.to_string()));
        };
        let mut stored = existing.clone();
        stored.extend(delta.clone());
        if key.resource_type == AUTOMATION_RUNBOOK {
            stored.insert(
                "last_modified_time".into(),
                jiff::Timestamp::now().to_string().into(),
            );
            stored.insert("etag".into(), Self::next_etag(&mut inner));
        }

        let fields: Vec<&String> = delta.keys().collect();
        tracing::info!(key = %key, ?fields, "object updated");
        Self::record_write(&mut inner, &key, Some(existing));
        inner.objects.insert(key.clone(), stored.clone());
        Ok(Self::view(&inner.faults, &key.resource_type, &stored))
    }

    fn delete_now(&self, scope: &Scope, name: &str) -> Result<(), RemoteError> {
        let key = ObjectKey::of(scope, name);
        let mut inner = self.lock();
        Self::enter(&mut inner, Operation::Delete, &key)?;

        if !inner.objects.contains_key(&key) {
            return Err(RemoteError::NotFound(key.to_string()));
        }
        if inner.faults.sticky_deletes.contains(&key.resource_type) {
            tracing::debug!(key = %key, "delete accepted, object kept");
            return Ok(());
        }

        let doomed: Vec<ObjectKey> = inner
            .objects
            .keys()
            .filter(|k| **k == key || k.is_below(&key))
            .cloned()
            .collect();
        for k in doomed {
            let before = inner.objects.remove(&k);
            Self::record_write(&mut inner, &k, before);
        }
        tracing::info!(key = %key, "object deleted");
        Ok(())
    }
}

impl RemoteClient for MemoryControlPlane {
    fn get<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Attributes>, RemoteError>> {
        Box::pin(async move { self.get_now(scope, name) })
    }

    fn create<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        attrs: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>> {
        Box::pin(async move { self.create_now(scope, name, attrs) })
    }

    fn update<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
        delta: &'a Attributes,
    ) -> BoxFuture<'a, Result<Attributes, RemoteError>> {
        Box::pin(async move { self.update_now(scope, name, delta) })
    }

    fn delete<'a>(
        &'a self,
        scope: &'a Scope,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move { self.delete_now(scope, name) })
    }
}
