use std::fmt;

use halyard_core::{Attributes, Presence, ResourceSchema, Value};
use serde::{Deserialize, Serialize};

/// What the reconciler must do to converge one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    /// Minimal set of changed field paths, e.g. `publish_content_link.hash`.
    Update { changed: Vec<String> },
    Delete,
    NoOp,
}

impl PlannedAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { changed } => write!(f, "update [{}]", changed.join(", ")),
            Self::Delete => write!(f, "delete"),
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// Structured before/after for a single field that doesn't match desired
/// state. `None` means the field is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    pub field: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl fmt::Display for FieldDrift {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "(absent)".to_string(),
        };
        write!(
            f,
            "{}: expected {}, got {}",
            self.field,
            show(&self.expected),
            show(&self.actual)
        )
    }
}

/// Fields the differ must not compare for one instance.
#[derive(Debug, Clone, Copy)]
pub struct DiffRules<'a> {
    pub schema: &'a ResourceSchema,
    pub ignore_changes: &'a [String],
}

impl DiffRules<'_> {
    fn skips(&self, path: &str) -> bool {
        self.schema.is_output_only(path)
            || self.ignore_changes.iter().any(|p| {
                path == p
                    || path
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
    }
}

/// Compute the action that converges `observed` towards `desired`.
pub fn diff(
    rules: DiffRules<'_>,
    presence: Presence,
    desired: &Attributes,
    observed: Option<&Attributes>,
) -> PlannedAction {
    match (presence, observed) {
        (Presence::Absent, None) => PlannedAction::NoOp,
        (Presence::Absent, Some(_)) => PlannedAction::Delete,
        (Presence::Present, None) => PlannedAction::Create,
        (Presence::Present, Some(observed)) => {
            let changed: Vec<String> = drift(rules, desired, observed)
                .into_iter()
                .map(|d| d.field)
                .collect();
            if changed.is_empty() {
                PlannedAction::NoOp
            } else {
                PlannedAction::Update { changed }
            }
        }
    }
}

/// Field-level differences between desired and observed attributes.
///
/// Only fields the desired side declares are compared; remote-only fields,
/// output-only fields, and `ignore_changes` paths never count. Single nested
/// blocks on both sides are compared field by field so the reported path is
/// as narrow as possible.
pub fn drift(rules: DiffRules<'_>, desired: &Attributes, observed: &Attributes) -> Vec<FieldDrift> {
    let mut out = Vec::new();
    walk(rules, "", desired, observed, &mut out);
    out
}

fn walk(
    rules: DiffRules<'_>,
    prefix: &str,
    desired: &Attributes,
    observed: &Attributes,
    out: &mut Vec<FieldDrift>,
) {
    for (key, want) in desired {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if rules.skips(&path) {
            continue;
        }

        let have = observed.get(key);
        match (want, have) {
            (Value::Null, None) => {}
            (Value::Blocks(w), Some(Value::Blocks(h))) if w.len() == 1 && h.len() == 1 => {
                walk(rules, &path, &w[0], &h[0], out);
            }
            (want, Some(have)) if want.matches(have) => {}
            _ => out.push(FieldDrift {
                field: path,
                expected: Some(want.clone()),
                actual: have.cloned(),
            }),
        }
    }
}

/// Top-level fields of `desired` touched by the changed paths.
pub fn update_delta(desired: &Attributes, changed: &[String]) -> Attributes {
    let mut delta = Attributes::new();
    for path in changed {
        let top = path.split('.').next().unwrap_or(path);
        if let Some(value) = desired.get(top) {
            delta.insert(top.to_string(), value.clone());
        }
    }
    delta
}
