//! Structural diff between two metadata trees.
//!
//! Nested maps are compared key by key and reported as dotted leaf paths.
//! Lists and scalars compare as whole values.

use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, MetadataValue};

/// Paths that differ between an old and a new metadata tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl MetadataDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// All differing paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.changed)
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        all
    }
}

/// Compute the differences from `old` to `new`.
pub fn diff(old: &Metadata, new: &Metadata) -> MetadataDiff {
    let mut out = MetadataDiff::default();
    diff_maps("", old, new, &mut out);
    out
}

fn diff_maps(prefix: &str, old: &Metadata, new: &Metadata, out: &mut MetadataDiff) {
    for (key, old_value) in old {
        let path = join(prefix, key);
        match new.get(key) {
            None => out.removed.push(path),
            Some(new_value) => diff_values(&path, old_value, new_value, out),
        }
    }

    for (key, _) in new {
        if !old.contains_key(key) {
            out.added.push(join(prefix, key));
        }
    }
}

fn diff_values(path: &str, old: &MetadataValue, new: &MetadataValue, out: &mut MetadataDiff) {
    match (old, new) {
        (MetadataValue::Map(a), MetadataValue::Map(b)) => diff_maps(path, a, b, out),
        (a, b) if a != b => out.changed.push(path.to_string()),
        _ => {}
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
