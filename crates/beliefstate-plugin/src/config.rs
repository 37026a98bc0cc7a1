//! Plugin-private configuration tree.
//!
//! A format-agnostic key/value tree: every node may hold a scalar and any
//! number of named children. The host fills one per plugin at load time;
//! the plugin only reads it.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Scalar value stored at a tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => f.write_str(s),
            ConfigValue::Integer(i) => write!(f, "{i}"),
            ConfigValue::Float(v) => write!(f, "{v}"),
            ConfigValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// Recursive configuration node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigTree {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<ConfigValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    children: BTreeMap<String, ConfigTree>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf holding `value`.
    pub fn leaf(value: impl Into<ConfigValue>) -> Self {
        Self {
            value: Some(value.into()),
            children: BTreeMap::new(),
        }
    }

    /// True when the node has neither a scalar nor children.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    pub fn value(&self) -> Option<&ConfigValue> {
        self.value.as_ref()
    }

    pub fn set_value(&mut self, value: impl Into<ConfigValue>) {
        self.value = Some(value.into());
    }

    pub fn children(&self) -> &BTreeMap<String, ConfigTree> {
        &self.children
    }

    pub fn child(&self, key: &str) -> Option<&ConfigTree> {
        self.children.get(key)
    }

    /// Mutable access to `key`, creating an empty node when missing.
    pub fn child_mut(&mut self, key: &str) -> &mut ConfigTree {
        self.children.entry(key.to_string()).or_default()
    }

    pub fn insert(&mut self, key: impl Into<String>, node: ConfigTree) {
        self.children.insert(key.into(), node);
    }

    /// Overlay `other` onto this tree; keys from `other` win.
    pub fn merge(&mut self, other: ConfigTree) {
        if other.value.is_some() {
            self.value = other.value;
        }
        for (key, node) in other.children {
            self.child_mut(&key).merge(node);
        }
    }

    /// Look up a node by dotted path, e.g. `"mongodb.host"`.
    pub fn get(&self, path: &str) -> Option<&ConfigTree> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Scalar at `path`.
    pub fn value_at(&self, path: &str) -> Option<&ConfigValue> {
        self.get(path).and_then(ConfigTree::value)
    }

    /// String at `path`. Other scalar kinds are rendered as text.
    pub fn string_value(&self, path: &str) -> Option<String> {
        self.value_at(path).map(ConfigValue::to_string)
    }

    pub fn integer_value(&self, path: &str) -> Option<i64> {
        match self.value_at(path)? {
            ConfigValue::Integer(i) => Some(*i),
            ConfigValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn float_value(&self, path: &str) -> Option<f64> {
        match self.value_at(path)? {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }

    pub fn bool_value(&self, path: &str) -> Option<bool> {
        match self.value_at(path)? {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON rendering, used for diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
