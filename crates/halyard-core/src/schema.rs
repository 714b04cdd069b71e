use std::collections::HashMap;

use crate::addr::Scope;
use crate::error::ValidationError;
use crate::value::{Attributes, Value};

/// Shape of a single field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Bool,
    Number,
    List,
    Block {
        fields: Vec<FieldSchema>,
        max_items: Option<usize>,
    },
}

/// Declared constraints for one field of a resource type.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Computed by the remote side. Never set by configuration and never
    /// compared when diffing.
    pub output_only: bool,
    /// Closed set of accepted string values (case-sensitive).
    pub allowed: Vec<String>,
    pub check: Option<fn(&str) -> Result<(), String>>,
}

impl FieldSchema {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            output_only: false,
            allowed: Vec::new(),
            check: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List)
    }

    pub fn block(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self::new(
            name,
            FieldKind::Block {
                fields,
                max_items: None,
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn output_only(mut self) -> Self {
        self.output_only = true;
        self
    }

    pub fn one_of(mut self, allowed: &[&str]) -> Self {
        self.allowed = allowed.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn validate_with(mut self, check: fn(&str) -> Result<(), String>) -> Self {
        self.check = Some(check);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        if let FieldKind::Block { max_items, .. } = &mut self.kind {
            *max_items = Some(max);
        }
        self
    }

    /// Check a declared value against this field, converting literal strings
    /// into the field's kind where that is unambiguous (`"true"` → `true`).
    /// References are left untouched; they are validated once resolved.
    fn coerce(&self, value: &Value, path: &str) -> Result<Value, ValidationError> {
        if let Value::Reference(_) = value {
            return Ok(value.clone());
        }

        let mismatch = |expected: &str| ValidationError::TypeMismatch {
            field: path.to_string(),
            expected: expected.to_string(),
            actual: kind_name(value).to_string(),
        };

        match &self.kind {
            FieldKind::String => {
                let s = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(mismatch("string")),
                };
                if !self.allowed.is_empty() && !self.allowed.contains(&s) {
                    return Err(ValidationError::NotAllowed {
                        field: path.to_string(),
                        value: s,
                        allowed: self.allowed.join(", "),
                    });
                }
                if let Some(check) = self.check {
                    check(&s).map_err(|reason| ValidationError::Invalid {
                        field: path.to_string(),
                        reason,
                    })?;
                }
                Ok(Value::String(s))
            }
            FieldKind::Bool => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s == "true" => Ok(Value::Bool(true)),
                Value::String(s) if s == "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch("bool")),
            },
            FieldKind::Number => match value {
                Value::Number(n) => Ok(Value::Number(*n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| mismatch("number")),
                _ => Err(mismatch("number")),
            },
            FieldKind::List => match value {
                Value::List(items) => Ok(Value::List(items.clone())),
                _ => Err(mismatch("list")),
            },
            FieldKind::Block { fields, max_items } => {
                let Value::Blocks(blocks) = value else {
                    return Err(mismatch("block"));
                };
                if let Some(max) = max_items {
                    if blocks.len() > *max {
                        return Err(ValidationError::TooManyBlocks {
                            field: path.to_string(),
                            max: *max,
                            actual: blocks.len(),
                        });
                    }
                }
                let validated = blocks
                    .iter()
                    .map(|block| validate_fields(fields, block, path))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Blocks(validated))
            }
        }
    }
}

/// Schema for one resource type: its fields and how to derive the remote
/// address from an instance's attributes.
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub fields: Vec<FieldSchema>,
    /// Field holding the remote name of the object.
    pub name_field: String,
    /// Fields forming the parent scope, outermost first.
    pub scope_fields: Vec<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            resource_type: resource_type.into(),
            fields,
            name_field: "name".to_string(),
            scope_fields: Vec::new(),
        }
    }

    pub fn scoped_by(mut self, scope_fields: &[&str]) -> Self {
        self.scope_fields = scope_fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate declared attributes and return them coerced to the schema's
    /// field kinds.
    pub fn validate(&self, attrs: &Attributes) -> Result<Attributes, ValidationError> {
        validate_fields(&self.fields, attrs, "")
    }

    /// Like [`validate`](Self::validate), but also rejects any reference that
    /// is still unresolved.
    pub fn validate_resolved(&self, attrs: &Attributes) -> Result<Attributes, ValidationError> {
        for (key, value) in attrs {
            if let Some(reference) = first_reference(value) {
                return Err(ValidationError::UnresolvedReference {
                    field: key.clone(),
                    reference,
                });
            }
        }
        self.validate(attrs)
    }

    /// True if the dotted path names an output-only field (at any depth).
    pub fn is_output_only(&self, path: &str) -> bool {
        let mut fields = &self.fields;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let Some(field) = fields.iter().find(|f| f.name == part) else {
                return false;
            };
            if field.output_only {
                return true;
            }
            match (&field.kind, parts.peek()) {
                (FieldKind::Block { fields: nested, .. }, Some(_)) => fields = nested,
                _ => return false,
            }
        }
        false
    }

    /// Remote scope derived from the (resolved) attributes.
    pub fn scope(&self, attrs: &Attributes) -> Result<Scope, ValidationError> {
        let mut scope = Scope::root(&self.resource_type);
        for key in &self.scope_fields {
            let value = required_str(attrs, key)?;
            scope = scope.with_segment(key, value);
        }
        Ok(scope)
    }

    /// Remote object name derived from the (resolved) attributes.
    pub fn remote_name(&self, attrs: &Attributes) -> Result<String, ValidationError> {
        required_str(attrs, &self.name_field).map(str::to_string)
    }
}

fn required_str<'a>(attrs: &'a Attributes, key: &str) -> Result<&'a str, ValidationError> {
    match attrs.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Reference(r)) => Err(ValidationError::UnresolvedReference {
            field: key.to_string(),
            reference: r.to_string(),
        }),
        Some(other) => Err(ValidationError::TypeMismatch {
            field: key.to_string(),
            expected: "string".to_string(),
            actual: kind_name(other).to_string(),
        }),
        None => Err(ValidationError::MissingField {
            field: key.to_string(),
        }),
    }
}

fn validate_fields(
    fields: &[FieldSchema],
    attrs: &Attributes,
    prefix: &str,
) -> Result<Attributes, ValidationError> {
    let path_of = |name: &str| {
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        }
    };

    if let Some(unknown) = attrs.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
        return Err(ValidationError::UnknownField {
            field: path_of(unknown),
        });
    }

    let mut out = Attributes::new();
    for field in fields {
        let path = path_of(&field.name);
        match attrs.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(ValidationError::MissingField { field: path });
                }
            }
            Some(_) if field.output_only => {
                return Err(ValidationError::OutputOnly { field: path });
            }
            Some(value) => {
                out.insert(field.name.clone(), field.coerce(value, &path)?);
            }
        }
    }
    Ok(out)
}

fn first_reference(value: &Value) -> Option<String> {
    match value {
        Value::Reference(r) => Some(r.to_string()),
        Value::List(items) => items.iter().find_map(first_reference),
        Value::Blocks(blocks) => blocks
            .iter()
            .flat_map(|b| b.values())
            .find_map(first_reference),
        _ => None,
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::List(_) => "list",
        Value::Blocks(_) => "block",
        Value::Reference(_) => "reference",
    }
}

/// Resource schemas by type tag.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: ResourceSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    pub fn get(&self, resource_type: &str) -> Result<&ResourceSchema, ValidationError> {
        self.schemas
            .get(resource_type)
            .ok_or_else(|| ValidationError::UnknownResourceType(resource_type.to_string()))
    }
}
