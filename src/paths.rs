//! Property path resolver.
//!
//! Computes the set of addressable leaf paths of a JSON record and resolves
//! values at arbitrary dotted paths. Both functions are pure; the store layer
//! on top is responsible for caching and equality gating.
//!
//! Path rules:
//! - nested plain objects are recursed into, producing dotted paths
//!   (`tracks.audio.state`)
//! - arrays are a single leaf path, never expanded per index
//! - resolution supports numeric segments into arrays (`layers.0`), and
//!   returns [`Value::Null`] for anything absent instead of erroring

use serde_json::Value;

/// Dotted path into a record, e.g. `tracks.audio.state`.
pub type PropertyPath = String;

/// Every leaf path reachable in `value`'s current shape, in stable
/// depth-first field order.
pub fn compute_paths(value: &Value) -> Vec<PropertyPath> {
    let mut out = Vec::new();
    collect(value, None, &mut out);
    out
}

fn collect(value: &Value, prefix: Option<&str>, out: &mut Vec<PropertyPath>) {
    match value {
        Value::Object(fields) => {
            if fields.is_empty() {
                if let Some(prefix) = prefix {
                    out.push(prefix.to_string());
                }
                return;
            }
            for (key, child) in fields {
                let path = match prefix {
                    Some(prefix) => format!("{prefix}.{key}"),
                    None => key.clone(),
                };
                collect(child, Some(&path), out);
            }
        }
        _ => {
            if let Some(prefix) = prefix {
                out.push(prefix.to_string());
            }
        }
    }
}

/// Resolve one dotted path against `value`. Missing segments resolve to
/// [`Value::Null`].
pub fn resolve_path(value: &Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(fields) => match fields.get(segment) {
                Some(child) => child,
                None => return Value::Null,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(child) => child,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}

/// Resolve many paths at once; results are aligned by index with `paths`.
pub fn resolve_paths<S: AsRef<str>>(value: &Value, paths: &[S]) -> Vec<Value> {
    paths
        .iter()
        .map(|path| resolve_path(value, path.as_ref()))
        .collect()
}
