use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::addr::ResourceAddr;

/// Ordered mapping of field name to value.
pub type Attributes = BTreeMap<String, Value>;

/// An attribute value as declared in configuration or reported by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    /// Nested sub-blocks, e.g. `publish_content_link { ... }`. Compared as
    /// an unordered collection.
    Blocks(Vec<Attributes>),
    /// Output field of another instance, resolved before execution.
    Reference(Reference),
}

/// `${type.name.field}`: a pointer at another instance's output field.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub target: ResourceAddr,
    pub field: String,
}

impl Reference {
    pub fn new(
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            target: ResourceAddr::new(resource_type, resource_name),
            field: field.into(),
        }
    }

    /// Parse a dotted `type.name.field` traversal. Nested field paths
    /// (`type.name.a.b`) keep the remainder joined in `field`.
    pub fn parse(path: &str) -> Option<Self> {
        let mut parts = path.splitn(3, '.');
        let resource_type = parts.next().filter(|s| !s.is_empty())?;
        let resource_name = parts.next().filter(|s| !s.is_empty())?;
        let field = parts.next().filter(|s| !s.is_empty())?;
        Some(Self::new(resource_type, resource_name, field))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.field)
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_blocks(&self) -> Option<&[Attributes]> {
        match self {
            Value::Blocks(blocks) => Some(blocks),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True if this value or anything nested inside it is still a reference.
    pub fn has_references(&self) -> bool {
        match self {
            Value::Reference(_) => true,
            Value::List(items) => items.iter().any(Value::has_references),
            Value::Blocks(blocks) => blocks
                .iter()
                .any(|b| b.values().any(Value::has_references)),
            _ => false,
        }
    }

    /// Type-aware comparison of a desired value against an observed one.
    ///
    /// Numbers compare numerically, strings case-sensitively, lists in order,
    /// and block collections as unordered multisets. Inside a block only the
    /// fields the desired side declares are compared; a desired `Null`
    /// matches a missing observed field.
    pub fn matches(&self, observed: &Value) -> bool {
        match (self, observed) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.matches(y))
            }
            (Value::Blocks(a), Value::Blocks(b)) => blocks_match(a, b),
            (Value::Reference(a), Value::Reference(b)) => a == b,
            _ => false,
        }
    }
}

/// Desired-side subset match of one block against another.
pub fn block_matches(desired: &Attributes, observed: &Attributes) -> bool {
    desired.iter().all(|(key, want)| match observed.get(key) {
        Some(have) => want.matches(have),
        None => want.is_null(),
    })
}

fn blocks_match(desired: &[Attributes], observed: &[Attributes]) -> bool {
    if desired.len() != observed.len() {
        return false;
    }
    let mut used = vec![false; observed.len()];
    'outer: for want in desired {
        for (slot, have) in used.iter_mut().zip(observed) {
            if !*slot && block_matches(want, have) {
                *slot = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Blocks(blocks) => {
                write!(f, "[")?;
                for (i, block) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{{")?;
                    for (j, (k, v)) in block.iter().enumerate() {
                        if j > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{k} = {v}")?;
                    }
                    write!(f, "}}")?;
                }
                write!(f, "]")
            }
            Value::Reference(r) => write!(f, "{r}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}
