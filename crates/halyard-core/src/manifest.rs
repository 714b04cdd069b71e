use serde::{Deserialize, Serialize};

use crate::addr::ResourceAddr;
use crate::instance::{Presence, ResolvedReference, ResourceInstance};

/// The full desired-state configuration: every declared resource instance,
/// in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub instances: Vec<ResourceInstance>,
}

impl Manifest {
    pub fn new(instances: Vec<ResourceInstance>) -> Self {
        Self { instances }
    }

    pub fn get(&self, addr: &ResourceAddr) -> Option<&ResourceInstance> {
        self.instances.iter().find(|i| &i.addr == addr)
    }

    pub fn addrs(&self) -> Vec<ResourceAddr> {
        self.instances.iter().map(|i| i.addr.clone()).collect()
    }

    /// All reference edges across the manifest.
    pub fn references(&self) -> Vec<ResolvedReference> {
        self.instances
            .iter()
            .flat_map(ResourceInstance::references)
            .collect()
    }

    /// The same manifest with every instance marked absent. Reconciling it
    /// tears down everything the manifest declares.
    pub fn teardown(&self) -> Self {
        Self {
            instances: self
                .instances
                .iter()
                .cloned()
                .map(|mut i| {
                    i.presence = Presence::Absent;
                    i
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
