//! Hierarchical configuration values.
//!
//! [`Meta`] is an immutable tree of named scalar values and named child nodes. Task
//! configuration is deliberately schema-light: tasks read what they need through dot paths
//! (`"fit.range.min"`) and fall back to their own defaults.
//!
//! Two properties matter to the rest of the framework:
//!
//! - **Structural comparison.** Values and nodes are kept in ordered maps, so two metas built in
//!   different orders compare equal and serialize to the same canonical JSON.
//! - **Stable digest.** [`Meta::digest`] hashes the canonical form with SHA-256 and is used as
//!   the configuration part of task cache keys.
//!
//! # Example
//!
//! ```rust
//! use forge_core::meta::Meta;
//!
//! let meta = Meta::builder("fit")
//!     .set("range.min", 0.5)
//!     .set("range.max", 2.0)
//!     .set("method", "lsq")
//!     .build();
//!
//! assert_eq!(meta.get_f64("range.max"), Some(2.0));
//! assert_eq!(meta.get_str("method"), Some("lsq"));
//! assert!(meta.node("range").is_some());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Path separator for nested meta and data names.
pub const PATH_SEPARATOR: char = '.';

/// A scalar or list value stored in a [`Meta`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit absence of a value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// List of values
    List(Vec<Value>),
}

impl Value {
    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get as integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get as float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Get as list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(v: Vec<V>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// Immutable, hierarchically named configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    nodes: BTreeMap<String, Meta>,
}

impl Meta {
    /// Create an empty meta with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Unnamed empty meta.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a meta with the given name.
    pub fn builder(name: impl Into<String>) -> MetaBuilder {
        MetaBuilder {
            meta: Meta::new(name),
        }
    }

    /// Builder seeded with a copy of this meta. The original is untouched.
    pub fn edit(&self) -> MetaBuilder {
        MetaBuilder { meta: self.clone() }
    }

    /// Name of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the meta holds neither values nor child nodes.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.nodes.is_empty()
    }

    /// Resolve a value by dot path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        match path.rsplit_once(PATH_SEPARATOR) {
            Some((parent, key)) => self.node(parent)?.values.get(key),
            None => self.values.get(path),
        }
    }

    /// Resolve a child node by dot path.
    pub fn node(&self, path: &str) -> Option<&Meta> {
        let mut current = self;
        for segment in path.split(PATH_SEPARATOR) {
            current = current.nodes.get(segment)?;
        }
        Some(current)
    }

    /// True if the path names either a value or a node.
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some() || self.node(path).is_some()
    }

    /// Get a value as boolean
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Get a value as integer
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    /// Get a value as float
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Get a value as string
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Local values of this node, ordered by key.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Direct child nodes, ordered by key.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Meta)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Deterministic JSON rendering used for hashing and comparison.
    ///
    /// Keys are sorted. Non-finite floats are written as `{"float": "inf" | "-inf" | "nan"}`
    /// so they stay distinct from each other and from null.
    pub fn canonical(&self) -> String {
        canonical_meta(self).to_string()
    }

    /// SHA-256 hex digest of [`Meta::canonical`].
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Convert a TOML value into a meta tree.
    ///
    /// Tables become nodes, everything else becomes a value. A non-table root is stored
    /// under the key `value`.
    pub fn from_toml(name: impl Into<String>, value: &toml::Value) -> Self {
        let mut meta = Meta::new(name);
        match value {
            toml::Value::Table(table) => {
                for (key, item) in table {
                    match item {
                        toml::Value::Table(_) => {
                            meta.nodes.insert(key.clone(), Meta::from_toml(key.clone(), item));
                        }
                        other => {
                            meta.values.insert(key.clone(), toml_to_value(other));
                        }
                    }
                }
            }
            other => {
                meta.values.insert("value".to_string(), toml_to_value(other));
            }
        }
        meta
    }
}

fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::Boolean(v) => Value::Bool(*v),
        toml::Value::Integer(v) => Value::Int(*v),
        toml::Value::Float(v) => Value::Float(*v),
        toml::Value::String(v) => Value::String(v.clone()),
        toml::Value::Array(arr) => Value::List(arr.iter().map(toml_to_value).collect()),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        // Tables inside arrays have no node slot; keep their text form.
        toml::Value::Table(table) => Value::String(table.to_string()),
    }
}

/// Mutable builder for [`Meta`].
#[derive(Debug, Clone, Default)]
pub struct MetaBuilder {
    meta: Meta,
}

impl MetaBuilder {
    /// Rename the node being built.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    /// Set a value by dot path, creating intermediate nodes as needed.
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set_value(path, value.into());
        self
    }

    /// Insert or replace a child node by dot path.
    pub fn node(mut self, path: &str, node: Meta) -> Self {
        let (parent, key) = split_last(path);
        let target = nodes_mut(&mut self.meta, parent);
        let mut node = node;
        node.name = key.to_string();
        target.nodes.insert(key.to_string(), node);
        self
    }

    /// Deep-merge another meta into this one. On conflicts `other` wins.
    pub fn update(mut self, other: &Meta) -> Self {
        merge_into(&mut self.meta, other);
        self
    }

    /// Remove a value or node by dot path.
    pub fn remove(mut self, path: &str) -> Self {
        let (parent, key) = split_last(path);
        let target = nodes_mut(&mut self.meta, parent);
        target.values.remove(key);
        target.nodes.remove(key);
        self
    }

    /// Freeze into an immutable meta.
    pub fn build(self) -> Meta {
        self.meta
    }

    fn set_value(&mut self, path: &str, value: Value) {
        let (parent, key) = split_last(path);
        let target = nodes_mut(&mut self.meta, parent);
        target.values.insert(key.to_string(), value);
    }
}

fn split_last(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once(PATH_SEPARATOR) {
        Some((parent, key)) => (Some(parent), key),
        None => (None, path),
    }
}

fn nodes_mut<'a>(root: &'a mut Meta, parent: Option<&str>) -> &'a mut Meta {
    let mut current = root;
    if let Some(parent) = parent {
        for segment in parent.split(PATH_SEPARATOR) {
            current = current
                .nodes
                .entry(segment.to_string())
                .or_insert_with(|| Meta::new(segment));
        }
    }
    current
}

fn canonical_meta(meta: &Meta) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    object.insert("name".to_string(), meta.name.clone().into());
    if !meta.values.is_empty() {
        let values = meta
            .values
            .iter()
            .map(|(key, value)| (key.clone(), canonical_value(value)))
            .collect();
        object.insert("values".to_string(), serde_json::Value::Object(values));
    }
    if !meta.nodes.is_empty() {
        let nodes = meta
            .nodes
            .iter()
            .map(|(key, node)| (key.clone(), canonical_meta(node)))
            .collect();
        object.insert("nodes".to_string(), serde_json::Value::Object(nodes));
    }
    serde_json::Value::Object(object)
}

fn canonical_value(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(number) => Json::Number(number),
            None => {
                let tag = if f.is_nan() {
                    "nan"
                } else if f.is_sign_positive() {
                    "inf"
                } else {
                    "-inf"
                };
                serde_json::json!({ "float": tag })
            }
        },
        Value::String(text) => Json::String(text.clone()),
        Value::List(items) => Json::Array(items.iter().map(canonical_value).collect()),
    }
}

fn merge_into(target: &mut Meta, other: &Meta) {
    for (key, value) in &other.values {
        target.values.insert(key.clone(), value.clone());
    }
    for (key, node) in &other.nodes {
        match target.nodes.get_mut(key) {
            Some(existing) => merge_into(existing, node),
            None => {
                target.nodes.insert(key.clone(), node.clone());
            }
        }
    }
}
