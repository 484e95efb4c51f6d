//! Nested data tree addressed by dotted paths
//!
//! `a.b.c` walks the keys `a`, `b`, `c`. Writes create missing intermediate
//! objects; reads never do. Empty segments (`a..b`, a trailing dot) are
//! skipped, so an empty path addresses the whole tree.

use serde_json::{Map, Value};

use crate::error::DataError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTree {
    root: Map<String, Value>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|segment| !segment.is_empty())
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` at `path`, creating intermediate objects as needed
    ///
    /// # Errors
    ///
    /// `EmptyPath` if the path has no segments, `NotAMapping` if an
    /// intermediate segment already holds something other than an object.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), DataError> {
        let parts: Vec<&str> = segments(path).collect();
        let (last, parents) = parts.split_last().ok_or(DataError::EmptyPath)?;

        let mut node = &mut self.root;
        for segment in parents {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match child {
                Value::Object(map) => map,
                _ => {
                    return Err(DataError::NotAMapping {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })
                }
            };
        }

        node.insert(last.to_string(), value);
        Ok(())
    }

    /// Deep merge: nested objects merge recursively, any other value
    /// overwrites, and no existing key is removed
    pub fn merge(&mut self, other: Map<String, Value>) {
        merge_into(&mut self.root, other);
    }

    /// Throw the current tree away and take `other` in its place
    pub fn replace(&mut self, other: Map<String, Value>) {
        self.root = other;
    }

    /// Value at `path`; the whole tree for an empty path
    pub fn get(&self, path: &str) -> Option<Value> {
        if segments(path).next().is_none() {
            return Some(Value::Object(self.root.clone()));
        }
        lookup(&self.root, path).cloned()
    }

    /// Value at `path`, or `default` the first time a segment is absent
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }
}

/// Walk `path` from `root`; `None` for an empty path or a missing segment
pub(crate) fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = segments(path);
    let mut node = root.get(parts.next()?)?;
    for segment in parts {
        node = match node {
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(node)
}

fn merge_into(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match value {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_into(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}
