use std::fmt::Write;

use halyard_core::{Attributes, Manifest, Presence, ResourceInstance, Value};

const INDENT: &str = "  ";

/// Serialize a manifest to HCL resource blocks.
///
/// Scalar attributes come first, nested blocks after them, and the
/// `lifecycle` meta-block last. [`parse_manifest`](crate::parse_manifest)
/// reads the output back into an equal manifest, with one exception: an
/// attribute holding an empty block list has no HCL spelling and is
/// omitted. [`ManifestBuilder`](crate::ManifestBuilder) never stores one.
pub fn render(manifest: &Manifest) -> String {
    let mut out = String::new();
    for (i, instance) in manifest.instances.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        render_instance(&mut out, instance);
    }
    out
}

fn render_instance(out: &mut String, instance: &ResourceInstance) {
    let _ = writeln!(
        out,
        "resource {} {} {{",
        quote(&instance.addr.resource_type),
        quote(&instance.addr.resource_name)
    );
    render_attributes(out, &instance.attributes, 1);

    if instance.presence == Presence::Absent || !instance.ignore_changes.is_empty() {
        let pad = INDENT;
        let _ = writeln!(out, "{pad}lifecycle {{");
        if !instance.ignore_changes.is_empty() {
            let paths: Vec<String> = instance.ignore_changes.iter().map(|p| quote(p)).collect();
            let _ = writeln!(out, "{pad}{pad}ignore_changes = [{}]", paths.join(", "));
        }
        if instance.presence == Presence::Absent {
            let _ = writeln!(out, "{pad}{pad}absent = true");
        }
        let _ = writeln!(out, "{pad}}}");
    }
    out.push_str("}\n");
}

fn render_attributes(out: &mut String, attrs: &Attributes, depth: usize) {
    let pad = INDENT.repeat(depth);
    let width = attrs
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Blocks(_)))
        .map(|(k, _)| k.len())
        .max()
        .unwrap_or(0);

    for (key, value) in attrs {
        if matches!(value, Value::Blocks(_)) {
            continue;
        }
        let _ = writeln!(out, "{pad}{key:<width$} = {}", expression(value));
    }

    for (key, value) in attrs {
        let Value::Blocks(blocks) = value else {
            continue;
        };
        for block in blocks {
            let _ = writeln!(out, "{pad}{key} {{");
            render_attributes(out, block, depth + 1);
            let _ = writeln!(out, "{pad}}}");
        }
    }
}

fn expression(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number(*n),
        Value::String(s) => quote(s),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(expression).collect();
            format!("[{}]", items.join(", "))
        }
        // Blocks inside lists have no HCL spelling; render them as objects.
        Value::Blocks(blocks) => {
            let objects: Vec<String> = blocks
                .iter()
                .map(|b| {
                    let fields: Vec<String> = b
                        .iter()
                        .map(|(k, v)| format!("{k} = {}", expression(v)))
                        .collect();
                    format!("{{ {} }}", fields.join(", "))
                })
                .collect();
            format!("[{}]", objects.join(", "))
        }
        Value::Reference(r) => format!("\"{r}\""),
    }
}

fn number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("$$"),
            '%' if chars.peek() == Some(&'{') => out.push_str("%%"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
