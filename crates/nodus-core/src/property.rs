//! Property collections for graph entities

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A collection of properties
///
/// Backed by an ordered map so that an entity always serializes to the
/// same bytes, which keeps content-addressed blocks deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    inner: BTreeMap<String, Value>,
}

impl Property {
    /// Create an empty property collection
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Create with a single property
    pub fn with<K: Into<String>, V: Into<Value>>(key: K, value: V) -> Self {
        let mut props = Self::new();
        props.set(key, value);
        props
    }

    /// Set a property value; setting null removes the key
    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        let key = key.into();
        match value.into() {
            Value::Null => {
                self.inner.remove(&key);
            }
            value => {
                self.inner.insert(key, value);
            }
        }
    }

    /// Get a property value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Remove a property
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.inner.remove(key)
    }

    /// Check if a property exists
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Get the number of properties
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate over properties in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    /// Get property keys in order
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    /// Merge with another property collection (other takes precedence)
    pub fn merge(&mut self, other: Property) {
        for (k, v) in other {
            self.set(k, v);
        }
    }

    /// Remove every property
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Convert into a map value
    pub fn to_value(&self) -> Value {
        Value::Map(self.inner.clone())
    }

    /// Convert to the underlying map
    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.inner
    }
}

impl IntoIterator for Property {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl FromIterator<(String, Value)> for Property {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut props = Property::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_collection() {
        let mut props = Property::new();
        props.set("name", "Alice");
        props.set("age", 30i64);

        assert_eq!(props.len(), 2);
        assert!(props.contains("name"));
        assert_eq!(props.get("name").and_then(|v| v.as_str()), Some("Alice"));
        assert_eq!(props.get("age").and_then(|v| v.as_integer()), Some(30));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["age", "name"]);
    }

    #[test]
    fn test_set_null_removes() {
        let mut props = Property::with("key", "value");
        props.set("key", Value::Null);
        assert!(props.is_empty());
    }

    #[test]
    fn test_property_merge() {
        let mut props1 = Property::with("a", "1");
        let mut props2 = Property::new();
        props2.set("b", "2");
        props2.set("a", "overwritten");

        props1.merge(props2);

        assert_eq!(props1.get("a").and_then(|v| v.as_str()), Some("overwritten"));
        assert_eq!(props1.get("b").and_then(|v| v.as_str()), Some("2"));
    }

    #[test]
    fn test_equal_content_serializes_identically() {
        let a: Property = [("x".to_string(), Value::Integer(1)), ("y".to_string(), Value::Integer(2))]
            .into_iter()
            .collect();
        let b: Property = [("y".to_string(), Value::Integer(2)), ("x".to_string(), Value::Integer(1))]
            .into_iter()
            .collect();
        assert_eq!(a, b);
        assert_eq!(a.to_value(), b.to_value());
    }
}
