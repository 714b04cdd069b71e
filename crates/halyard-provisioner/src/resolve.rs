use halyard_core::{Attributes, Manifest, Reference, ResourceInstance, ValidationError, Value};

use crate::state::StateStore;

/// Attributes with every resolvable reference substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub attributes: Attributes,
    /// Field paths still holding a reference whose target value is unknown
    /// (typically an output of an instance not yet created).
    pub pending: Vec<(String, Reference)>,
}

/// Substitutes references with values from the referenced instances.
///
/// A field the target declares resolves to the declared value (following
/// references there too), so a renamed parent is seen before it is applied.
/// Outputs and fields the manifest does not declare come from the target's
/// last observation.
pub struct Resolver<'a> {
    manifest: &'a Manifest,
    store: &'a StateStore,
}

impl<'a> Resolver<'a> {
    pub fn new(manifest: &'a Manifest, store: &'a StateStore) -> Self {
        Self { manifest, store }
    }

    /// Resolve every reference or fail with the first one left unresolved.
    pub fn resolve(&self, instance: &ResourceInstance) -> Result<Attributes, ValidationError> {
        let resolution = self.resolve_partial(instance);
        match resolution.pending.into_iter().next() {
            None => Ok(resolution.attributes),
            Some((field, reference)) => Err(ValidationError::UnresolvedReference {
                field,
                reference: reference.to_string(),
            }),
        }
    }

    /// Resolve what can be resolved; unresolved references stay in place
    /// and are listed in [`Resolution::pending`].
    pub fn resolve_partial(&self, instance: &ResourceInstance) -> Resolution {
        let mut pending = Vec::new();
        let attributes = instance
            .attributes
            .iter()
            .map(|(key, value)| (key.clone(), self.substitute(value, key, 0, &mut pending)))
            .collect();
        Resolution {
            attributes,
            pending,
        }
    }

    fn substitute(
        &self,
        value: &Value,
        path: &str,
        depth: usize,
        pending: &mut Vec<(String, Reference)>,
    ) -> Value {
        match value {
            Value::Reference(reference) => match self.lookup(reference, depth) {
                Some(resolved) => resolved,
                None => {
                    pending.push((path.to_string(), reference.clone()));
                    value.clone()
                }
            },
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.substitute(item, path, depth, pending))
                    .collect(),
            ),
            Value::Blocks(blocks) => Value::Blocks(
                blocks
                    .iter()
                    .map(|block| {
                        block
                            .iter()
                            .map(|(key, v)| {
                                let nested = format!("{path}.{key}");
                                (key.clone(), self.substitute(v, &nested, depth, pending))
                            })
                            .collect()
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn lookup(&self, reference: &Reference, depth: usize) -> Option<Value> {
        // References are acyclic once the graph is built; the bound only
        // protects direct callers that skip graph validation.
        if depth > self.manifest.len() {
            return None;
        }

        let declared = self
            .manifest
            .get(&reference.target)
            .and_then(|target| field_at(&target.attributes, &reference.field))
            .filter(|value| !value.is_null());
        if let Some(declared) = declared {
            if !declared.has_references() {
                return Some(declared.clone());
            }
            let mut pending = Vec::new();
            let resolved = self.substitute(declared, &reference.field, depth + 1, &mut pending);
            return pending.is_empty().then_some(resolved);
        }

        // Outputs and fields of instances no longer declared.
        self.store
            .observed(&reference.target)
            .and_then(|observed| {
                field_at(&observed.attributes, &reference.field)
                    .filter(|value| !value.is_null())
                    .cloned()
            })
    }
}

/// Value at a dotted path; nested segments descend into the first block.
pub(crate) fn field_at<'v>(attrs: &'v Attributes, path: &str) -> Option<&'v Value> {
    let mut parts = path.split('.');
    let mut value = attrs.get(parts.next()?)?;
    for part in parts {
        value = value.as_blocks()?.first()?.get(part)?;
    }
    Some(value)
}
