use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite key for addressing a resource instance.
///
/// Two instances of the same type but different logical names (e.g. two
/// `azurerm_automation_runbook` blocks) have distinct addresses.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ResourceAddr {
    pub resource_type: String,
    pub resource_name: String,
}

impl ResourceAddr {
    pub fn new(resource_type: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
        }
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.resource_name)
    }
}

/// Hierarchical remote address of a resource collection.
///
/// For an automation runbook this is the resource group followed by the
/// automation account; a resource group itself has no parent segments.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub resource_type: String,
    pub segments: Vec<ScopeSegment>,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScopeSegment {
    /// Attribute the segment was taken from, e.g. "resource_group_name".
    pub key: String,
    pub value: String,
}

impl Scope {
    pub fn root(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            segments: Vec::new(),
        }
    }

    pub fn with_segment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.push(ScopeSegment {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.value.as_str())
    }

    /// Segment values from outermost to innermost.
    pub fn path(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.value.as_str()).collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:/{}", self.resource_type, self.path().join("/"))
    }
}
