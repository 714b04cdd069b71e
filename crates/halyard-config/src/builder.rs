use std::collections::HashSet;

use halyard_core::{Attributes, Manifest, Presence, Reference, ResourceAddr, ResourceInstance, Value};

use crate::error::ConfigError;

/// Structured manifest construction.
///
/// ```
/// use halyard_config::ManifestBuilder;
///
/// let manifest = ManifestBuilder::new()
///     .resource("azurerm_resource_group", "test", |r| {
///         r.set("name", "acctestRG-1").set("location", "westeurope")
///     })
///     .resource("azurerm_automation_account", "test", |r| {
///         r.set("name", "acctest-1")
///             .reference("resource_group_name", "azurerm_resource_group", "test", "name")
///             .block("sku", |b| b.set("name", "Free"))
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(manifest.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    instances: Vec<ResourceInstance>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(
        mut self,
        resource_type: &str,
        name: &str,
        build: impl FnOnce(ResourceBuilder) -> ResourceBuilder,
    ) -> Self {
        let builder = ResourceBuilder {
            instance: ResourceInstance::new(ResourceAddr::new(resource_type, name)),
        };
        self.instances.push(build(builder).instance);
        self
    }

    pub fn push(mut self, instance: ResourceInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Finish the manifest. Identities must be unique.
    pub fn build(self) -> Result<Manifest, ConfigError> {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(&instance.addr) {
                return Err(ConfigError::DuplicateResource(instance.addr.to_string()));
            }
        }
        Ok(Manifest::new(self.instances))
    }
}

/// Attributes of a single resource instance.
#[derive(Debug)]
pub struct ResourceBuilder {
    instance: ResourceInstance,
}

impl ResourceBuilder {
    /// Set `key`. An empty block list leaves the key unset.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        put(&mut self.instance.attributes, key, value.into());
        self
    }

    pub fn reference(self, key: &str, resource_type: &str, name: &str, field: &str) -> Self {
        self.set(key, Reference::new(resource_type, name, field))
    }

    /// Append one nested block under `key`. Repeated calls add more blocks.
    pub fn block(mut self, key: &str, build: impl FnOnce(BlockBuilder) -> BlockBuilder) -> Self {
        let block = build(BlockBuilder::default()).attrs;
        push_block(&mut self.instance.attributes, key, block);
        self
    }

    /// Declare that the instance must not exist.
    pub fn absent(mut self) -> Self {
        self.instance.presence = Presence::Absent;
        self
    }

    pub fn ignore_changes(mut self, path: &str) -> Self {
        self.instance.ignore_changes.push(path.to_string());
        self
    }
}

/// Attributes of one nested block.
#[derive(Debug, Default)]
pub struct BlockBuilder {
    attrs: Attributes,
}

impl BlockBuilder {
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        put(&mut self.attrs, key, value.into());
        self
    }

    pub fn reference(self, key: &str, resource_type: &str, name: &str, field: &str) -> Self {
        self.set(key, Reference::new(resource_type, name, field))
    }

    pub fn block(mut self, key: &str, build: impl FnOnce(BlockBuilder) -> BlockBuilder) -> Self {
        let block = build(BlockBuilder::default()).attrs;
        push_block(&mut self.attrs, key, block);
        self
    }
}

// HCL has no spelling for zero blocks, so they are never stored.
fn put(attrs: &mut Attributes, key: &str, value: Value) {
    match value {
        Value::Blocks(blocks) if blocks.is_empty() => {
            attrs.remove(key);
        }
        value => {
            attrs.insert(key.to_string(), value);
        }
    }
}

fn push_block(attrs: &mut Attributes, key: &str, block: Attributes) {
    match attrs.get_mut(key) {
        Some(Value::Blocks(blocks)) => blocks.push(block),
        _ => {
            attrs.insert(key.to_string(), Value::Blocks(vec![block]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_blocks_accumulate() {
        let manifest = ManifestBuilder::new()
            .resource("widget", "a", |r| {
                r.block("rule", |b| b.set("port", 80_i64))
                    .block("rule", |b| b.set("port", 443_i64))
            })
            .build()
            .expect("build");

        let rules = manifest.instances[0].attributes["rule"]
            .as_blocks()
            .expect("blocks");
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn empty_block_lists_are_not_stored() {
        let manifest = ManifestBuilder::new()
            .resource("widget", "a", |r| {
                r.block("source", |b| b.set("uri", "https://example.com"))
                    .set("source", Value::Blocks(Vec::new()))
                    .block("nested", |b| b.set("inner", Value::Blocks(Vec::new())))
            })
            .build()
            .expect("build");

        let attrs = &manifest.instances[0].attributes;
        assert!(!attrs.contains_key("source"));
        let nested = attrs["nested"].as_blocks().expect("blocks");
        assert!(nested[0].is_empty());
    }

    #[test]
    fn duplicate_identities_are_rejected() {
        let err = ManifestBuilder::new()
            .resource("widget", "a", |r| r)
            .resource("widget", "a", |r| r.set("name", "again"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateResource(addr) if addr == "widget.a"));
    }

    #[test]
    fn absent_and_ignore_changes_are_recorded() {
        let manifest = ManifestBuilder::new()
            .resource("widget", "a", |r| r.absent().ignore_changes("source.version"))
            .build()
            .expect("build");

        let instance = &manifest.instances[0];
        assert!(instance.is_absent());
        assert_eq!(instance.ignore_changes, vec!["source.version".to_string()]);
    }
}
