//! Flattens the structured `style` property into a kebab-case string map the
//! host can apply directly.
//!
//! Unit values are `{value, type}` with `type` one of `REAL` (pixels),
//! `PERCENT` or `AUTO`; bare numbers are pixels. Edge groups (`margin`,
//! `padding`, `position`) accept `all`, `horizontal`, `vertical` and the four
//! sides, most specific last.

use canopy_core::TreeNode;
use canopy_core::tree;
use serde_json::{Map, Value};

pub fn flatten(style: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in style {
        flatten_prop(key, value, &mut out);
    }
    out
}

/// Flatten `property` on every node of `tree` that carries an object there.
pub fn flatten_tree(tree: &mut TreeNode, property: &str) {
    tree::for_each_mut(tree, |node, _| {
        if let Some(Value::Object(style)) = node.props.get(property) {
            let flat = flatten(style);
            node.props.insert(property.to_string(), Value::Object(flat));
        }
    });
}

fn put(out: &mut Map<String, Value>, key: &str, value: String) {
    out.insert(key.to_string(), Value::String(value));
}

fn flatten_prop(key: &str, value: &Value, out: &mut Map<String, Value>) {
    match key {
        "margin" | "padding" => edges(key, value, out),
        "position" if value.is_object() => edges("", value, out),
        "positionType" => {
            if let Some(kind) = value.as_str() {
                put(out, "position", enum_value(kind));
            }
        }
        "size" => {
            if let Value::Object(size) = value {
                for (k, v) in size {
                    match k.as_str() {
                        "aspectRatio" => put(out, "aspect-ratio", plain(v)),
                        _ => {
                            if let Some(u) = unit(v) {
                                put(out, &kebab(k), u);
                            }
                        }
                    }
                }
            }
        }
        "cornerRadius" => {
            let radius = match value {
                Value::Object(obj) => obj.get("radius").and_then(unit),
                other => unit(other),
            };
            if let Some(r) = radius {
                put(out, "border-radius", r);
            }
        }
        "borderWidth" => {
            if let Some(u) = unit(value) {
                put(out, "border-width", u);
            }
        }
        "flex" => {
            if let Value::Object(flex) = value {
                for (k, v) in flex {
                    let name = match k.as_str() {
                        "grow" => "flex-grow".to_string(),
                        "shrink" => "flex-shrink".to_string(),
                        "basis" => "flex-basis".to_string(),
                        other => kebab(other),
                    };
                    let text = if k == "basis" {
                        unit(v).unwrap_or_else(|| plain(v))
                    } else {
                        plain(v)
                    };
                    put(out, &name, text);
                }
            } else {
                put(out, "flex", plain(value));
            }
        }
        "display" => {
            if let Some(d) = value.as_str() {
                put(out, "display", enum_value(d));
            }
        }
        _ => {
            let text = if value.is_object() {
                match unit(value) {
                    Some(u) => u,
                    None => return,
                }
            } else {
                plain(value)
            };
            put(out, &kebab(key), text);
        }
    }
}

const EDGES: [(&str, &[&str]); 9] = [
    ("all", &["top", "right", "bottom", "left"]),
    ("horizontal", &["left", "right"]),
    ("vertical", &["top", "bottom"]),
    ("start", &["left"]),
    ("end", &["right"]),
    ("left", &["left"]),
    ("right", &["right"]),
    ("top", &["top"]),
    ("bottom", &["bottom"]),
];

/// `prefix` is `margin`/`padding`, or empty for `position` offsets.
fn edges(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    let name = |side: &str| {
        if prefix.is_empty() {
            side.to_string()
        } else {
            format!("{prefix}-{side}")
        }
    };
    let Value::Object(group) = value else {
        if !prefix.is_empty()
            && let Some(u) = unit(value)
        {
            put(out, prefix, u);
        }
        return;
    };
    for (key, sides) in EDGES {
        if let Some(u) = group.get(key).and_then(unit) {
            for &side in sides {
                put(out, &name(side), u.clone());
            }
        }
    }
}

fn unit(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(format!("{n}px")),
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let kind = obj.get("type").and_then(Value::as_str).unwrap_or("REAL");
            if kind.eq_ignore_ascii_case("AUTO") {
                return Some("auto".to_string());
            }
            let n = obj.get("value")?;
            let n = match n {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return None,
            };
            if kind.eq_ignore_ascii_case("PERCENT") {
                Some(format!("{n}%"))
            } else {
                Some(format!("{n}px"))
            }
        }
        _ => None,
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `SPACE_BETWEEN` → `space-between`.
fn enum_value(s: &str) -> String {
    s.to_ascii_lowercase().replace('_', "-")
}

/// `backgroundColor` → `background-color`.
fn kebab(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
