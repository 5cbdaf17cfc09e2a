//! Immutable hierarchical trees of lazy data.
//!
//! A [`DataNode`] maps unique names to either a [`Data`] item or a child node. Items are
//! addressed by dot paths: `a.b.c` is item `c` in node `b` in node `a`. Nodes are frozen by
//! [`DataNodeBuilder::build`]; composing a new tree always goes through a fresh builder, so a
//! built node can be shared between threads and never changes.
//!
//! Nothing in this module awaits a goal except [`DataNode::compute_all`].

use std::any::type_name;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::data::{Data, Dynamic};
use crate::error::{ForgeError, ForgeResult, GoalError};
use crate::filter::DataFilter;
use crate::goal::Outcome;
use crate::meta::{Meta, PATH_SEPARATOR};

enum Entry<T> {
    Data(Data<T>),
    Node(DataNode<T>),
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        match self {
            Entry::Data(data) => Entry::Data(data.clone()),
            Entry::Node(node) => Entry::Node(node.clone()),
        }
    }
}

struct NodeInner<T> {
    name: String,
    meta: Meta,
    items: BTreeMap<String, Entry<T>>,
}

/// Immutable tree of named [`Data`] items and child nodes.
pub struct DataNode<T> {
    inner: Arc<NodeInner<T>>,
}

impl<T> Clone for DataNode<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}{}{}", prefix, PATH_SEPARATOR, key)
    }
}

impl<T: Clone + Send + Sync + 'static> DataNode<T> {
    /// Empty node.
    pub fn empty(name: impl Into<String>) -> Self {
        DataNodeBuilder::new(name).build()
    }

    /// Start a new tree.
    pub fn builder(name: impl Into<String>) -> DataNodeBuilder<T> {
        DataNodeBuilder::new(name)
    }

    /// Builder seeded with the content of this node. The node itself is untouched.
    pub fn edit(&self) -> DataNodeBuilder<T> {
        let mut builder = DataNodeBuilder::new(self.inner.name.clone());
        builder.meta = self.inner.meta.clone();
        for (key, entry) in &self.inner.items {
            let slot = match entry {
                Entry::Data(data) => Slot::Data(data.clone()),
                Entry::Node(node) => Slot::Node(node.edit()),
            };
            builder.items.insert(key.clone(), slot);
        }
        builder
    }

    /// Local name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Node meta.
    pub fn meta(&self) -> &Meta {
        &self.inner.meta
    }

    /// Declared element type.
    pub fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    /// True when the node has neither items nor child nodes.
    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    /// Resolve an item by dot path.
    pub fn opt_data(&self, path: &str) -> Option<&Data<T>> {
        match path.split_once(PATH_SEPARATOR) {
            Some((head, rest)) => self.child(head)?.opt_data(rest),
            None => match self.inner.items.get(path)? {
                Entry::Data(data) => Some(data),
                Entry::Node(_) => None,
            },
        }
    }

    /// Resolve a child node by dot path.
    pub fn opt_node(&self, path: &str) -> Option<&DataNode<T>> {
        let mut current = self;
        for segment in path.split(PATH_SEPARATOR) {
            current = current.child(segment)?;
        }
        Some(current)
    }

    /// Like [`DataNode::opt_data`], failing with [`ForgeError::NotFound`].
    pub fn get_data(&self, path: &str) -> ForgeResult<&Data<T>> {
        self.opt_data(path)
            .ok_or_else(|| ForgeError::not_found("data", path))
    }

    /// Like [`DataNode::opt_node`], failing with [`ForgeError::NotFound`].
    pub fn get_node(&self, path: &str) -> ForgeResult<&DataNode<T>> {
        self.opt_node(path)
            .ok_or_else(|| ForgeError::not_found("node", path))
    }

    fn child(&self, name: &str) -> Option<&DataNode<T>> {
        match self.inner.items.get(name)? {
            Entry::Node(node) => Some(node),
            Entry::Data(_) => None,
        }
    }

    /// Direct child nodes, ordered by name.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &DataNode<T>)> {
        self.inner.items.iter().filter_map(|(key, entry)| match entry {
            Entry::Node(node) => Some((key.as_str(), node)),
            Entry::Data(_) => None,
        })
    }

    /// Items with their full dot paths, ordered by path.
    ///
    /// With `recursive` set, items of child nodes are included. The sequence is lazy; call
    /// again to restart it.
    pub fn items(&self, recursive: bool) -> Items<'_, T> {
        Items {
            recursive,
            stack: vec![(String::new(), self.inner.items.iter())],
        }
    }

    /// Number of items, optionally including child nodes.
    pub fn count(&self, recursive: bool) -> usize {
        self.items(recursive).count()
    }

    /// New tree restricted to the items accepted by `filter`.
    pub fn filter(&self, filter: &DataFilter) -> DataNode<T> {
        self.filter_at("", filter).unwrap_or_else(|| {
            DataNode::builder(self.inner.name.clone())
                .set_meta(self.inner.meta.clone())
                .build()
        })
    }

    fn filter_at(&self, prefix: &str, filter: &DataFilter) -> Option<DataNode<T>> {
        let mut items = BTreeMap::new();
        for (key, entry) in &self.inner.items {
            let path = join_path(prefix, key);
            match entry {
                Entry::Data(data) if filter.accepts(&path, data.meta()) => {
                    items.insert(key.clone(), entry.clone());
                }
                Entry::Data(_) => {}
                Entry::Node(node) => {
                    if let Some(node) = node.filter_at(&path, filter) {
                        items.insert(key.clone(), Entry::Node(node));
                    }
                }
            }
        }
        if items.is_empty() {
            return None;
        }
        Some(DataNode {
            inner: Arc::new(NodeInner {
                name: self.inner.name.clone(),
                meta: self.inner.meta.clone(),
                items,
            }),
        })
    }

    /// Same tree with the dynamic element type.
    pub fn erase(&self) -> DataNode<Dynamic> {
        let items = self
            .inner
            .items
            .iter()
            .map(|(key, entry)| {
                let entry = match entry {
                    Entry::Data(data) => Entry::Data(data.erase()),
                    Entry::Node(node) => Entry::Node(node.erase()),
                };
                (key.clone(), entry)
            })
            .collect();
        DataNode {
            inner: Arc::new(NodeInner {
                name: self.inner.name.clone(),
                meta: self.inner.meta.clone(),
                items,
            }),
        }
    }

    /// Start every item without waiting.
    pub fn start_all(&self) {
        for (_, data) in self.items(true) {
            data.goal().run();
        }
    }

    /// Compute every item concurrently and report each outcome.
    pub async fn compute_all(&self) -> ComputeReport<T> {
        let items: Vec<(String, Data<T>)> = self
            .items(true)
            .map(|(path, data)| (path, data.clone()))
            .collect();
        self.start_all();
        let outcomes = futures::future::join_all(items.iter().map(|(_, data)| data.wait())).await;
        ComputeReport {
            outcomes: items
                .into_iter()
                .map(|(path, _)| path)
                .zip(outcomes)
                .collect(),
        }
    }
}

impl DataNode<Dynamic> {
    /// Assert that every item declares element type `R`.
    ///
    /// Items are checked in path order; the first violation fails with
    /// [`ForgeError::TypeMismatch`]. Nothing is computed.
    pub fn checked<R: Clone + Send + Sync + 'static>(&self) -> ForgeResult<DataNode<R>> {
        if let Some((path, data)) = self.items(true).find(|(_, data)| !data.is::<R>()) {
            return Err(ForgeError::TypeMismatch {
                path,
                expected: type_name::<R>(),
                actual: data.type_name(),
            });
        }
        self.downcast_tree()
    }

    fn downcast_tree<R: Clone + Send + Sync + 'static>(&self) -> ForgeResult<DataNode<R>> {
        let mut items = BTreeMap::new();
        for (key, entry) in &self.inner.items {
            let entry = match entry {
                Entry::Data(data) => Entry::Data(data.downcast::<R>()?),
                Entry::Node(node) => Entry::Node(node.downcast_tree::<R>()?),
            };
            items.insert(key.clone(), entry);
        }
        Ok(DataNode {
            inner: Arc::new(NodeInner {
                name: self.inner.name.clone(),
                meta: self.inner.meta.clone(),
                items,
            }),
        })
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for DataNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataNode")
            .field("name", &self.inner.name)
            .field("type", &self.type_name())
            .field("items", &self.inner.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Depth-first iterator over `(path, item)` pairs of a [`DataNode`].
pub struct Items<'a, T> {
    recursive: bool,
    stack: Vec<(String, btree_map::Iter<'a, String, Entry<T>>)>,
}

impl<'a, T> Iterator for Items<'a, T> {
    type Item = (String, &'a Data<T>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (prefix, iter) = self.stack.last_mut()?;
            match iter.next() {
                None => {
                    self.stack.pop();
                }
                Some((key, Entry::Data(data))) => return Some((join_path(prefix, key), data)),
                Some((key, Entry::Node(node))) => {
                    if self.recursive {
                        let path = join_path(prefix, key);
                        self.stack.push((path, node.inner.items.iter()));
                    }
                }
            }
        }
    }
}

/// Per-item outcomes of [`DataNode::compute_all`], in path order.
#[derive(Debug, Clone)]
pub struct ComputeReport<T> {
    outcomes: Vec<(String, Outcome<T>)>,
}

impl<T> ComputeReport<T> {
    /// Every item with its outcome.
    pub fn outcomes(&self) -> &[(String, Outcome<T>)] {
        &self.outcomes
    }

    /// Items that produced a value.
    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(path, outcome)| outcome.as_ref().ok().map(|v| (path.as_str(), v)))
    }

    /// Items that failed or were cancelled.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &GoalError)> {
        self.outcomes
            .iter()
            .filter_map(|(path, outcome)| outcome.as_ref().err().map(|e| (path.as_str(), e)))
    }

    /// First failure in path order.
    pub fn first_failure(&self) -> Option<(&str, &GoalError)> {
        self.failed().next()
    }

    /// True when no item failed.
    pub fn is_success(&self) -> bool {
        self.first_failure().is_none()
    }

    /// All values by path, or the first failure.
    pub fn into_result(self) -> ForgeResult<BTreeMap<String, T>> {
        let mut values = BTreeMap::new();
        for (path, outcome) in self.outcomes {
            values.insert(path, outcome?);
        }
        Ok(values)
    }
}

enum Slot<T> {
    Data(Data<T>),
    Node(DataNodeBuilder<T>),
}

impl<T: Clone + Send + Sync + 'static> Slot<T> {
    /// Child builder in this slot. A data item here is replaced by an empty node.
    fn node_mut(&mut self, name: &str) -> &mut DataNodeBuilder<T> {
        match self {
            Slot::Node(builder) => builder,
            Slot::Data(_) => {
                *self = Slot::Node(DataNodeBuilder::new(name));
                self.node_mut(name)
            }
        }
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Data(data) => Slot::Data(data.clone()),
            Slot::Node(builder) => Slot::Node(builder.clone()),
        }
    }
}

/// Mutable builder for [`DataNode`].
pub struct DataNodeBuilder<T> {
    name: String,
    meta: Meta,
    items: BTreeMap<String, Slot<T>>,
}

impl<T> Clone for DataNodeBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            meta: self.meta.clone(),
            items: self.items.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> DataNodeBuilder<T> {
    /// Empty builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: Meta::empty(),
            items: BTreeMap::new(),
        }
    }

    /// Rename the root node.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// Replace the root node meta.
    pub fn set_meta(&mut self, meta: Meta) -> &mut Self {
        self.meta = meta;
        self
    }

    /// Put an item at a dot path, creating intermediate nodes. Replaces whatever was there.
    pub fn put_data(&mut self, path: &str, data: Data<T>) -> &mut Self {
        let (parent, key) = self.parent_of(path);
        parent.items.insert(key.to_string(), Slot::Data(data));
        self
    }

    /// Put an already known value at a dot path.
    pub fn put_static(&mut self, path: &str, value: T) -> &mut Self {
        let name = path
            .rsplit_once(PATH_SEPARATOR)
            .map_or(path, |(_, key)| key)
            .to_string();
        self.put_data(path, Data::ready(name, value))
    }

    /// Put a node at a dot path. An existing node there is merged with it.
    pub fn put_node(&mut self, path: &str, node: &DataNode<T>) -> &mut Self {
        let (parent, key) = self.parent_of(path);
        match parent.items.get_mut(key) {
            Some(Slot::Node(existing)) => {
                existing.update(node);
            }
            _ => {
                let mut child = node.edit();
                child.name = key.to_string();
                parent.items.insert(key.to_string(), Slot::Node(child));
            }
        }
        self
    }

    /// Merge the content of `node` into the root. On name collisions the later write wins;
    /// child nodes present on both sides are merged recursively.
    pub fn update(&mut self, node: &DataNode<T>) -> &mut Self {
        self.meta = self.meta.edit().update(node.meta()).build();
        for (key, entry) in &node.inner.items {
            match entry {
                Entry::Data(data) => {
                    self.items.insert(key.clone(), Slot::Data(data.clone()));
                }
                Entry::Node(child) => {
                    self.put_node(key, child);
                }
            }
        }
        self
    }

    /// Number of direct entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing has been put yet.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Freeze the current content. The builder stays usable and later changes to it do not
    /// reach the returned node.
    pub fn build(&self) -> DataNode<T> {
        let items = self
            .items
            .iter()
            .map(|(key, slot)| {
                let entry = match slot {
                    Slot::Data(data) => Entry::Data(data.clone()),
                    Slot::Node(builder) => Entry::Node(builder.build()),
                };
                (key.clone(), entry)
            })
            .collect();
        DataNode {
            inner: Arc::new(NodeInner {
                name: self.name.clone(),
                meta: self.meta.clone(),
                items,
            }),
        }
    }

    fn parent_of<'p>(&mut self, path: &'p str) -> (&mut DataNodeBuilder<T>, &'p str) {
        let (parent, key) = match path.rsplit_once(PATH_SEPARATOR) {
            Some((parent, key)) => (Some(parent), key),
            None => (None, path),
        };
        let mut current = self;
        if let Some(parent) = parent {
            for segment in parent.split(PATH_SEPARATOR) {
                current = current
                    .items
                    .entry(segment.to_string())
                    .or_insert_with(|| Slot::Node(DataNodeBuilder::new(segment)))
                    .node_mut(segment);
            }
        }
        (current, key)
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for DataNodeBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataNodeBuilder")
            .field("name", &self.name)
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}
