//! Layered read-through view over several [`Meta`] trees.
//!
//! The first layer wins: a lookup returns the value from the first layer that defines the
//! path and falls through to the following layers otherwise. Workspace targets with a
//! `@parent` reference are resolved into a laminate of `[child, parent, grandparent, ...]`.

use crate::meta::{Meta, Value};

/// Ordered stack of metas, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct Laminate {
    layers: Vec<Meta>,
}

impl Laminate {
    /// Create a laminate from layers ordered by priority.
    pub fn new(layers: impl IntoIterator<Item = Meta>) -> Self {
        Self {
            layers: layers.into_iter().collect(),
        }
    }

    /// Append a layer with lower priority than all existing ones.
    pub fn with_fallback(mut self, layer: Meta) -> Self {
        self.layers.push(layer);
        self
    }

    /// Layers in priority order.
    pub fn layers(&self) -> &[Meta] {
        &self.layers
    }

    /// First value defined for `path` across the layers.
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.layers.iter().find_map(|layer| layer.get(path))
    }

    /// True if any layer defines `path`.
    pub fn has(&self, path: &str) -> bool {
        self.layers.iter().any(|layer| layer.has(path))
    }

    /// Laminate over the sub-nodes at `path` of every layer that has one.
    pub fn node(&self, path: &str) -> Laminate {
        Laminate::new(self.layers.iter().filter_map(|l| l.node(path)).cloned())
    }

    /// Flatten into a single meta. Values from earlier layers override later ones.
    pub fn merge(&self) -> Meta {
        let mut layers = self.layers.iter().rev();
        let Some(base) = layers.next() else {
            return Meta::empty();
        };
        let mut builder = base.edit();
        for layer in layers {
            builder = builder.update(layer);
        }
        let name = self.layers.first().map(|l| l.name().to_string()).unwrap_or_default();
        builder.name(name).build()
    }
}
