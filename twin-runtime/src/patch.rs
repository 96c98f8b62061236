//! Property patching
//!
//! Patches address a property document with dotted/bracketed paths such as
//! `metrics.temp` or `items[0].name`. The first segment always names a
//! top-level property. Every operator except `copy` mutates the document and
//! produces watch paths for propagation; `merge` produces one path per
//! merged top-level key.

use serde_json::{Map, Value};
use twin_types::{Node, PatchOperator, Properties};

use crate::error::PatchError;

/// One step of a property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].c` into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, PatchError> {
    let invalid = || PatchError::PathInvalid(path.to_string());
    if path.is_empty() || path.starts_with(['.', '[']) || path.ends_with('.') {
        return Err(invalid());
    }

    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                } else if !matches!(segments.last(), Some(Segment::Index(_))) {
                    return Err(invalid());
                }
                if matches!(chars.peek(), Some('.') | Some('[') | None) {
                    return Err(invalid());
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index = digits.parse().map_err(|_| invalid())?;
                segments.push(Segment::Index(index));
                if !matches!(chars.peek(), Some('.') | Some('[') | None) {
                    return Err(invalid());
                }
            }
            ']' => return Err(invalid()),
            other => key.push(other),
        }
    }

    if !key.is_empty() {
        segments.push(Segment::Key(key));
    }
    Ok(segments)
}

/// Apply `op` at `path`.
///
/// Returns the value now stored at the path (`None` after `remove`), or the
/// read value for `copy`. `value` is ignored by `remove` and `copy`.
pub fn patch(
    doc: &mut Properties,
    path: &str,
    op: PatchOperator,
    value: Option<&Node>,
) -> Result<Option<Node>, PatchError> {
    let segments = parse_path(path)?;
    let mut root = Value::Object(std::mem::take(doc));
    let result = apply(&mut root, &segments, path, op, value);
    if let Value::Object(map) = root {
        *doc = map;
    }
    result
}

/// Read the value at `path` (the `copy` operator).
pub fn get(doc: &Properties, path: &str) -> Result<Node, PatchError> {
    let segments = parse_path(path)?;
    let (first, rest) = match segments.split_first() {
        Some((Segment::Key(key), rest)) => (key, rest),
        _ => return Err(PatchError::PathInvalid(path.to_string())),
    };
    let mut current = doc
        .get(first)
        .ok_or_else(|| PatchError::PropertyNotFound(path.to_string()))?;
    for segment in rest {
        current = child(current, segment).ok_or_else(|| PatchError::PropertyNotFound(path.to_string()))?;
    }
    Ok(current.clone())
}

/// Paths whose change must be propagated after a successful patch
pub fn watch_paths(path: &str, op: PatchOperator, value: Option<&Node>) -> Vec<String> {
    match op {
        PatchOperator::Copy => Vec::new(),
        PatchOperator::Merge => match value {
            Some(Value::Object(map)) => map.keys().map(|k| format!("{}.{}", path, k)).collect(),
            _ => vec![path.to_string()],
        },
        _ => vec![path.to_string()],
    }
}

fn child<'a>(value: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match segment {
        Segment::Key(key) => value.as_object()?.get(key),
        Segment::Index(i) => value.as_array()?.get(*i),
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match segment {
        Segment::Key(key) => value.as_object_mut()?.get_mut(key),
        Segment::Index(i) => value.as_array_mut()?.get_mut(*i),
    }
}

fn apply(
    root: &mut Value,
    segments: &[Segment],
    path: &str,
    op: PatchOperator,
    value: Option<&Node>,
) -> Result<Option<Node>, PatchError> {
    let not_found = || PatchError::PropertyNotFound(path.to_string());
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(PatchError::PathInvalid(path.to_string()));
    };

    let mut parent = root;
    for segment in parents {
        parent = child_mut(parent, segment).ok_or_else(not_found)?;
    }

    match op {
        PatchOperator::Copy => child(parent, leaf).cloned().map(Some).ok_or_else(not_found),
        PatchOperator::Replace => {
            let value = value.cloned().unwrap_or(Value::Null);
            set_child(parent, leaf, value.clone()).ok_or_else(not_found)?;
            Ok(Some(value))
        }
        PatchOperator::Remove => {
            match (parent, leaf) {
                (Value::Object(map), Segment::Key(key)) => {
                    map.remove(key);
                }
                (Value::Array(items), Segment::Index(i)) => {
                    if *i < items.len() {
                        items.remove(*i);
                    }
                }
                _ => return Err(not_found()),
            }
            Ok(None)
        }
        PatchOperator::Add => {
            if child(parent, leaf).is_none() {
                set_child(parent, leaf, Value::Array(Vec::new())).ok_or_else(not_found)?;
            }
            let target = child_mut(parent, leaf).ok_or_else(not_found)?;
            let Value::Array(items) = target else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "an array",
                });
            };
            items.push(value.cloned().unwrap_or(Value::Null));
            Ok(Some(target.clone()))
        }
        PatchOperator::Merge => {
            let Some(Value::Object(patch)) = value else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "an object patch",
                });
            };
            if child(parent, leaf).is_none() {
                set_child(parent, leaf, Value::Object(Map::new())).ok_or_else(not_found)?;
            }
            let target = child_mut(parent, leaf).ok_or_else(not_found)?;
            let Value::Object(existing) = target else {
                return Err(PatchError::TypeMismatch {
                    path: path.to_string(),
                    expected: "an object",
                });
            };
            merge_into(existing, patch);
            Ok(Some(target.clone()))
        }
    }
}

/// Write `value` under `leaf`; `None` when the parent cannot hold it.
fn set_child(parent: &mut Value, leaf: &Segment, value: Value) -> Option<()> {
    match (parent, leaf) {
        (Value::Object(map), Segment::Key(key)) => {
            map.insert(key.clone(), value);
            Some(())
        }
        (Value::Array(items), Segment::Index(i)) => {
            if *i < items.len() {
                items[*i] = value;
            } else if *i == items.len() {
                items.push(value);
            } else {
                return None;
            }
            Some(())
        }
        _ => None,
    }
}

fn merge_into(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
    for (key, value) in src {
        match (dst.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            _ => {
                dst.insert(key.clone(), value.clone());
            }
        }
    }
}
