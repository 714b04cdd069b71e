use serde::{Deserialize, Serialize};

use crate::addr::ResourceAddr;
use crate::value::{Attributes, Reference, Value};

/// Whether the configuration wants the instance to exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// One declared resource: identity plus its desired attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    pub addr: ResourceAddr,
    pub attributes: Attributes,
    #[serde(default)]
    pub presence: Presence,
    /// Field paths (e.g. `publish_content_link.version`) excluded from drift
    /// comparison for this instance only.
    #[serde(default)]
    pub ignore_changes: Vec<String>,
}

/// Edge from a field of one instance to an output field of another.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub source: ResourceAddr,
    /// Dotted path of the referencing field inside the source instance.
    pub field_path: String,
    pub target: ResourceAddr,
    pub target_field: String,
}

impl ResourceInstance {
    pub fn new(addr: ResourceAddr) -> Self {
        Self {
            addr,
            attributes: Attributes::new(),
            presence: Presence::Present,
            ignore_changes: Vec::new(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.presence == Presence::Absent
    }

    /// Every reference held by this instance, with the path of the field
    /// holding it. Nested block fields use dotted paths.
    pub fn references(&self) -> Vec<ResolvedReference> {
        let mut out = Vec::new();
        for (key, value) in &self.attributes {
            collect_references(&self.addr, key, value, &mut out);
        }
        out
    }

    /// Distinct addresses this instance references.
    pub fn dependencies(&self) -> Vec<ResourceAddr> {
        let mut deps: Vec<ResourceAddr> = self.references().into_iter().map(|r| r.target).collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

fn collect_references(
    source: &ResourceAddr,
    path: &str,
    value: &Value,
    out: &mut Vec<ResolvedReference>,
) {
    match value {
        Value::Reference(Reference { target, field }) => out.push(ResolvedReference {
            source: source.clone(),
            field_path: path.to_string(),
            target: target.clone(),
            target_field: field.clone(),
        }),
        Value::List(items) => {
            for item in items {
                collect_references(source, path, item, out);
            }
        }
        Value::Blocks(blocks) => {
            for block in blocks {
                for (key, nested) in block {
                    collect_references(source, &format!("{path}.{key}"), nested, out);
                }
            }
        }
        _ => {}
    }
}
