use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use halyard_core::{Attributes, ResourceAddr, Scope};
use serde::{Deserialize, Serialize};

/// Bump when the persisted state shape changes.
pub const STATE_VERSION: u32 = 1;

/// The remote's view of one instance at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub addr: ResourceAddr,
    pub scope: Scope,
    /// Remote object name within `scope`.
    pub name: String,
    pub attributes: Attributes,
    pub observed_at: jiff::Timestamp,
}

/// State for a single managed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub addr: ResourceAddr,
    pub status: ResourceStatus,
    /// Desired attributes with references resolved.
    pub declared: Attributes,
    pub observed: Option<ObservedState>,
    /// Instances this one referenced when it was last reconciled. Used to
    /// order teardown of instances that left the configuration.
    #[serde(default)]
    pub depends_on: Vec<ResourceAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Created,
    Updated,
    InSync,
    Drifted,
    Failed,
}

/// Serializable copy of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub version: u32,
    pub resources: Vec<ResourceState>,
}

impl StateSnapshot {
    pub fn get(&self, addr: &ResourceAddr) -> Option<&ResourceState> {
        self.resources.iter().find(|r| &r.addr == addr)
    }
}

/// Last-known declared and observed attributes per instance.
///
/// A single map-level lock guards insert/lookup; each instance's entry is
/// only written by the worker reconciling that instance.
#[derive(Debug, Default)]
pub struct StateStore {
    resources: RwLock<HashMap<ResourceAddr, ResourceState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let resources = snapshot
            .resources
            .into_iter()
            .map(|r| (r.addr.clone(), r))
            .collect();
        Self {
            resources: RwLock::new(resources),
        }
    }

    /// Copy of every entry, ordered by address.
    pub fn snapshot(&self) -> StateSnapshot {
        let guard = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        let mut resources: Vec<ResourceState> = guard.values().cloned().collect();
        resources.sort_by(|a, b| a.addr.cmp(&b.addr));
        StateSnapshot {
            version: STATE_VERSION,
            resources,
        }
    }

    pub fn get(&self, addr: &ResourceAddr) -> Option<ResourceState> {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
    }

    pub fn observed(&self, addr: &ResourceAddr) -> Option<ObservedState> {
        self.get(addr).and_then(|r| r.observed)
    }

    pub fn upsert(&self, state: ResourceState) {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.addr.clone(), state);
    }

    pub fn remove(&self, addr: &ResourceAddr) -> Option<ResourceState> {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr)
    }

    pub fn addrs(&self) -> Vec<ResourceAddr> {
        let mut addrs: Vec<ResourceAddr> = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
