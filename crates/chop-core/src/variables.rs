//! Ordered variable mappings shared by config, frontmatter and templates.

use serde::{Deserialize, Serialize};
pub use serde_json::Value;
use serde_json::Map;
use thiserror::Error;

/// Reasons a YAML source could not become a [`Variables`] mapping.
#[derive(Debug, Error)]
pub enum VariablesError {
    /// Source is not valid YAML.
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Source is valid YAML but its top level is not a mapping.
    #[error("expected a mapping at the top level, found {0}")]
    NotAMapping(&'static str),
}

/// String-keyed mapping that keeps insertion order.
///
/// Values are JSON-shaped: null, bool, number, string, sequence or nested
/// mapping. Layers are combined with [`Variables::merge`], where the layer
/// applied last wins on conflicting keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(Map<String, Value>);

impl Variables {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML mapping. Empty or comment-only input yields an empty mapping.
    pub fn from_yaml(source: &str) -> Result<Self, VariablesError> {
        if source.trim().is_empty() {
            return Ok(Self::new());
        }

        match serde_yaml::from_str::<Value>(source)? {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            Value::Bool(_) => Err(VariablesError::NotAMapping("a boolean")),
            Value::Number(_) => Err(VariablesError::NotAMapping("a number")),
            Value::String(_) => Err(VariablesError::NotAMapping("a string")),
            Value::Array(_) => Err(VariablesError::NotAMapping("a sequence")),
        }
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String, VariablesError> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Overlay `other` onto `self`; keys from `other` win.
    pub fn merge(&mut self, other: &Variables) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Return a copy of `self` with `other` overlaid.
    #[must_use]
    pub fn merged(&self, other: &Variables) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Insert or replace a single value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Look up a string value; other value types yield `None`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Whether `key` is set to `true`.
    #[must_use]
    pub fn is_true(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::Bool(true)))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the mapping has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Convert into a single JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Variables> for Value {
    fn from(vars: Variables) -> Self {
        vars.into_value()
    }
}
