//! Dotted paths into records and field trees.
//!
//! Paths are `.`-separated field names. Inlined columns replace the
//! separator with [`ESCAPE`] so the column name stays a single field name.

use serde_json::{Map, Value};

/// Separator between path segments.
pub const SEPARATOR: char = '.';

/// Marker replacing [`SEPARATOR`] in inlined column names.
pub const ESCAPE: &str = "@@@";

/// Column name used for inlined path `path`.
pub fn escape(path: &str) -> String {
    path.replace(SEPARATOR, ESCAPE)
}

/// Inverse of [`escape`].
pub fn unescape(column: &str) -> String {
    column.replace(ESCAPE, ".")
}

/// Joins `name` onto `prefix`; an empty prefix yields `name`.
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{name}")
    }
}

/// Returns the part of `path` below `ancestor`, if `path` is strictly under it.
///
/// `a.b.c` is under `a` and `a.b`, but not under `a.b.c` or `a.bc`.
pub fn strip_ancestor<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    path.strip_prefix(ancestor)?.strip_prefix(SEPARATOR)
}

/// Returns true if `path` is strictly under `ancestor`.
pub fn is_under(path: &str, ancestor: &str) -> bool {
    strip_ancestor(path, ancestor).is_some()
}

/// Name of the virtual collection holding model `model_path` of `root`.
pub fn virtual_collection_name(root: &str, model_path: &str) -> String {
    format!("{root}_{}", model_path.replace(SEPARATOR, "_"))
}

/// Returns true if `name` can be used as a field name.
pub fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(SEPARATOR) && !name.contains(ESCAPE)
}

/// Reads the value at `path`, descending through objects only.
pub fn get<'a>(record: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split(SEPARATOR);
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Removes and returns the value at `path`.
///
/// Objects left empty by the removal are removed as well, so a record never
/// keeps an empty shell of a field that was moved elsewhere.
pub fn remove(record: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once(SEPARATOR) {
        None => record.remove(path),
        Some((head, rest)) => {
            let child = record.get_mut(head)?.as_object_mut()?;
            let removed = remove(child, rest);
            if removed.is_some() && child.is_empty() {
                record.remove(head);
            }
            removed
        }
    }
}

/// Renders an identity value as the prefix of a `_fid`.
pub fn render_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
