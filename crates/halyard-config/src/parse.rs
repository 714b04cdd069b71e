use std::path::Path;

use hcl_edit::expr::{Expression, Traversal, TraversalOperator};
use hcl_edit::structure::{Block, BlockLabel, Body};
use hcl_edit::template::Element;
use halyard_core::{Attributes, Manifest, Presence, Reference, ResourceAddr, ResourceInstance, Value};

use crate::builder::ManifestBuilder;
use crate::error::ConfigError;

const RESOURCE_BLOCK: &str = "resource";
const LIFECYCLE_BLOCK: &str = "lifecycle";

/// Read and parse a configuration file.
pub fn load_manifest(path: &Path) -> Result<Manifest, ConfigError> {
    let source = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), "loading configuration");
    parse_manifest(&source)
}

/// Parse HCL text made of `resource "<type>" "<name>" { ... }` blocks.
///
/// Attribute values may be literals, `"${type.name.field}"` interpolations,
/// or bare `type.name.field` traversals. Nested blocks become
/// [`Value::Blocks`]; a `lifecycle` block sets per-instance options.
pub fn parse_manifest(source: &str) -> Result<Manifest, ConfigError> {
    let body = hcl_edit::parser::parse_body(source).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut builder = ManifestBuilder::new();
    for block in body.blocks() {
        let ident = block.ident.as_str();
        if ident != RESOURCE_BLOCK {
            return Err(ConfigError::UnexpectedBlock(ident.to_string()));
        }
        builder = builder.push(parse_resource(block)?);
    }
    if let Some(attr) = body.attributes().next() {
        return Err(ConfigError::UnexpectedBlock(attr.key.as_str().to_string()));
    }
    builder.build()
}

fn parse_resource(block: &Block) -> Result<ResourceInstance, ConfigError> {
    let labels = block
        .labels
        .iter()
        .map(|label| match label {
            BlockLabel::String(s) => s.as_str().to_string(),
            BlockLabel::Ident(i) => i.as_str().to_string(),
        })
        .collect::<Vec<_>>();
    let [resource_type, resource_name] = labels.as_slice() else {
        return Err(ConfigError::Labels {
            block: RESOURCE_BLOCK.to_string(),
            expected: 2,
            actual: labels.len(),
        });
    };

    let mut instance = ResourceInstance::new(ResourceAddr::new(resource_type, resource_name));
    let resource = instance.addr.to_string();
    instance.attributes = parse_body(&resource, &block.body, true)?;

    for nested in block.body.blocks() {
        if nested.ident.as_str() == LIFECYCLE_BLOCK {
            apply_lifecycle(&resource, nested, &mut instance)?;
        }
    }
    Ok(instance)
}

/// Convert a block body into attributes. At the resource level the
/// `lifecycle` meta-block is skipped; it is handled by the caller.
fn parse_body(resource: &str, body: &Body, top_level: bool) -> Result<Attributes, ConfigError> {
    let mut attrs = Attributes::new();

    for attr in body.attributes() {
        let key = attr.key.as_str();
        let value = to_value(resource, key, &attr.value)?;
        if attrs.insert(key.to_string(), value).is_some() {
            return Err(ConfigError::DuplicateField {
                resource: resource.to_string(),
                field: key.to_string(),
            });
        }
    }

    for nested in body.blocks() {
        let key = nested.ident.as_str();
        if top_level && key == LIFECYCLE_BLOCK {
            continue;
        }
        if !nested.labels.is_empty() {
            return Err(ConfigError::Labels {
                block: key.to_string(),
                expected: 0,
                actual: nested.labels.len(),
            });
        }
        let inner = parse_body(resource, &nested.body, false)?;
        match attrs.get_mut(key) {
            Some(Value::Blocks(blocks)) => blocks.push(inner),
            Some(_) => {
                return Err(ConfigError::DuplicateField {
                    resource: resource.to_string(),
                    field: key.to_string(),
                });
            }
            None => {
                attrs.insert(key.to_string(), Value::Blocks(vec![inner]));
            }
        }
    }

    Ok(attrs)
}

fn apply_lifecycle(
    resource: &str,
    block: &Block,
    instance: &mut ResourceInstance,
) -> Result<(), ConfigError> {
    let unsupported = |field: &str, reason: &str| ConfigError::Unsupported {
        resource: resource.to_string(),
        field: format!("{LIFECYCLE_BLOCK}.{field}"),
        reason: reason.to_string(),
    };

    for (key, value) in parse_body(resource, &block.body, false)? {
        match (key.as_str(), value) {
            ("absent", Value::Bool(absent)) => {
                instance.presence = if absent {
                    Presence::Absent
                } else {
                    Presence::Present
                };
            }
            ("ignore_changes", Value::List(paths)) => {
                for path in paths {
                    match path {
                        Value::String(s) => instance.ignore_changes.push(s),
                        _ => return Err(unsupported(&key, "expected a list of field paths")),
                    }
                }
            }
            ("absent", _) => return Err(unsupported(&key, "expected a bool")),
            ("ignore_changes", _) => return Err(unsupported(&key, "expected a list")),
            _ => return Err(unsupported(&key, "unknown lifecycle argument")),
        }
    }
    Ok(())
}

fn to_value(resource: &str, field: &str, expr: &Expression) -> Result<Value, ConfigError> {
    let unsupported = |reason: &str| ConfigError::Unsupported {
        resource: resource.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    };

    match expr {
        Expression::Null(_) => Ok(Value::Null),
        Expression::Bool(b) => Ok(Value::Bool(*b.value())),
        Expression::Number(n) => n
            .value()
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| unsupported("number out of range")),
        Expression::String(s) => Ok(Value::String(s.as_str().to_string())),
        // Inside `ignore_changes` bare paths name fields, not other resources.
        Expression::Array(items) if field == "ignore_changes" => items
            .iter()
            .map(|item| match item {
                Expression::Variable(v) => Ok(Value::String(v.as_str().to_string())),
                Expression::Traversal(t) => traversal_path(t)
                    .map(|parts| Value::String(parts.join(".")))
                    .ok_or_else(|| unsupported("expected a field path")),
                other => to_value(resource, field, other),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expression::Array(items) => items
            .iter()
            .map(|item| to_value(resource, field, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expression::Traversal(t) => traversal_reference(t)
            .map(Value::Reference)
            .ok_or_else(|| unsupported("expected a `type.name.field` reference")),
        Expression::StringTemplate(template) => {
            let elements: Vec<&Element> = template.iter().collect();
            match elements.as_slice() {
                [Element::Interpolation(interp)] => match &interp.expr {
                    Expression::Traversal(t) => traversal_reference(t)
                        .map(Value::Reference)
                        .ok_or_else(|| unsupported("expected a `type.name.field` reference")),
                    _ => Err(unsupported("only references may be interpolated")),
                },
                parts if parts.iter().all(|e| matches!(e, Element::Literal(_))) => {
                    let mut text = String::new();
                    for part in parts {
                        if let Element::Literal(lit) = part {
                            text.push_str(lit.value());
                        }
                    }
                    Ok(Value::String(text))
                }
                _ => Err(unsupported(
                    "interpolation must be the whole string, e.g. \"${type.name.field}\"",
                )),
            }
        }
        Expression::Parenthesis(inner) => to_value(resource, field, inner.inner()),
        _ => Err(unsupported("expression kind is not supported")),
    }
}

/// `root.a.b` → `["root", "a", "b"]`; `None` for index/splat operators.
fn traversal_path(traversal: &Traversal) -> Option<Vec<String>> {
    let root = traversal.expr.as_variable()?;
    let mut parts = vec![root.as_str().to_string()];
    for op in traversal.operators.iter() {
        match op.value() {
            TraversalOperator::GetAttr(ident) => parts.push(ident.as_str().to_string()),
            _ => return None,
        }
    }
    Some(parts)
}

fn traversal_reference(traversal: &Traversal) -> Option<Reference> {
    traversal_path(traversal).and_then(|parts| Reference::parse(&parts.join(".")))
}
