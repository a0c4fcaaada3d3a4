//! Bounded example values per field path, kept beside the schema rather than
//! inside it so the schema merge stays order-independent.
//!
//! Paths use dots for object members and `[]` for array elements:
//! `user.email`, `items[].id`, `[].name`. A scalar at the root is `$`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

pub const ROOT_PATH: &str = "$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleStore {
    capacity: usize,
    fields: BTreeMap<String, VecDeque<Value>>,
}

impl ExampleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            fields: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records every non-null scalar in `value` under its field path.
    pub fn record(&mut self, value: &Value) {
        self.walk(String::new(), value);
    }

    fn walk(&mut self, prefix: String, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    self.walk(path, child);
                }
            }
            Value::Array(elements) => {
                let path = format!("{}[]", prefix);
                for element in elements {
                    self.walk(path.clone(), element);
                }
            }
            Value::Null => {}
            scalar => {
                let path = if prefix.is_empty() {
                    ROOT_PATH.to_string()
                } else {
                    prefix
                };
                self.push(path, scalar.clone());
            }
        }
    }

    /// Oldest example is evicted once the path is at capacity; duplicates are skipped.
    fn push(&mut self, path: String, value: Value) {
        if self.capacity == 0 {
            return;
        }
        let slot = self.fields.entry(path).or_default();
        if slot.contains(&value) {
            return;
        }
        slot.push_back(value);
        while slot.len() > self.capacity {
            slot.pop_front();
        }
    }

    /// Appends `other`'s examples after ours, oldest first.
    pub fn absorb(&mut self, other: ExampleStore) {
        for (path, values) in other.fields {
            for value in values {
                self.push(path.clone(), value);
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&VecDeque<Value>> {
        self.fields.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VecDeque<Value>)> {
        self.fields.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Plain map for reports.
    pub fn to_map(&self) -> BTreeMap<String, Vec<Value>> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
            .collect()
    }
}
