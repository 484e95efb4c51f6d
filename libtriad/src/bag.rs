//! Flat key/value bag shared by views and models
//!
//! Views keep their options in a config bag; models keep a config bag (the
//! named endpoint table) and a request-parameter bag. A bag is a plain JSON
//! object: `set` overwrites one key, `merge` overwrites many, nothing is
//! ever removed implicitly.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bag {
    entries: Map<String, Value>,
}

impl Bag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// String value under `key`, `None` for missing or non-string entries
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Shallow merge: every key of `other` overwrites the same key here
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.entries.insert(key, value);
        }
    }

    /// Snapshot of every entry
    pub fn all(&self) -> Map<String, Value> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Map<String, Value>> for Bag {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}
