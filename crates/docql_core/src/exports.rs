//! Values exported by leaf fields.
//!
//! A leaf marked with `@field(key: ...)` writes its resolved value here, and
//! directive arguments further down the tree read it back through
//! `$fields{key}` placeholders. A scope is owned by one selection set; each
//! branch below it gets its own copy, so writes never flow sideways or up.

use indexmap::IndexMap;
use serde_json::Value;

/// An ordered map of exported values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exports {
    values: IndexMap<String, Value>,
}

impl Exports {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an exported value, replacing any earlier value under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Returns the value exported under `key`.
    ///
    /// Presence is what counts: a key exported as `""`, `0`, `false` or
    /// `null` is still found.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if a value was exported under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of exported values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if nothing was exported.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over exported values in export order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Exports {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_falsy_values_are_present() {
        let exports: Exports = [("zero", json!(0)), ("empty", json!("")), ("none", Value::Null)]
            .into_iter()
            .collect();

        assert_eq!(exports.get("zero"), Some(&json!(0)));
        assert!(exports.contains("empty"));
        assert!(exports.contains("none"));
        assert!(!exports.contains("missing"));
    }

    #[test]
    fn test_branch_copies_are_independent() {
        let mut parent = Exports::new();
        parent.insert("userId", json!("u1"));

        let mut branch = parent.clone();
        branch.insert("postId", json!("p1"));

        assert_eq!(parent.len(), 1);
        assert_eq!(branch.len(), 2);
        assert_eq!(branch.get("userId"), Some(&json!("u1")));
    }
}
