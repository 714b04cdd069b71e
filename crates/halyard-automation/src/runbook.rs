use std::fmt;
use std::str::FromStr;

use halyard_core::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of script an automation runbook holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunbookType {
    Graph,
    GraphPowerShell,
    GraphPowerShellWorkflow,
    PowerShell,
    PowerShellWorkflow,
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown runbook type `{0}`")]
pub struct UnknownRunbookType(pub String);

impl RunbookType {
    pub const ALL: [RunbookType; 6] = [
        Self::Graph,
        Self::GraphPowerShell,
        Self::GraphPowerShellWorkflow,
        Self::PowerShell,
        Self::PowerShellWorkflow,
        Self::Script,
    ];

    /// Wire names, in the same order as [`ALL`](Self::ALL).
    pub const NAMES: [&'static str; 6] = [
        "Graph",
        "GraphPowerShell",
        "GraphPowerShellWorkflow",
        "PowerShell",
        "PowerShellWorkflow",
        "Script",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Graph => "Graph",
            Self::GraphPowerShell => "GraphPowerShell",
            Self::GraphPowerShellWorkflow => "GraphPowerShellWorkflow",
            Self::PowerShell => "PowerShell",
            Self::PowerShellWorkflow => "PowerShellWorkflow",
            Self::Script => "Script",
        }
    }
}

impl fmt::Display for RunbookType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunbookType {
    type Err = UnknownRunbookType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownRunbookType(s.to_string()))
    }
}

impl From<RunbookType> for Value {
    fn from(t: RunbookType) -> Self {
        Value::from(t.as_str())
    }
}
