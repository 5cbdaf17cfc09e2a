//! Task output cache.
//!
//! Outputs are stored by task name plus the digest of the model's resolved meta. A hit
//! returns the stored tree as is: its goals keep their memoized values and nothing is
//! rescheduled. Concurrent misses on one key may each build a tree, but only the first
//! insert is kept and every caller receives that retained tree.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use forge_core::{DataNode, Dynamic, ForgeResult, Meta};
use tracing::{debug, info};

use super::Workspace;
use crate::config::ForgeConfig;
use crate::context::{Context, Plugin, ServiceRegistry};
use crate::task::{Task, TaskModel};

/// Cache key: task name and canonical meta digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    task: String,
    digest: String,
}

impl CacheKey {
    /// Key for `task` under `meta`. The meta's own name does not take part.
    pub fn new(task: impl Into<String>, meta: &Meta) -> Self {
        Self {
            task: task.into(),
            digest: meta.edit().name("").build().digest(),
        }
    }

    /// Key for a built model.
    pub fn of(model: &TaskModel) -> Self {
        Self::new(model.name(), model.meta())
    }

    /// Task name.
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Meta digest (SHA-256 hex).
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.task, &self.digest[..self.digest.len().min(12)])
    }
}

/// Concurrent map of cached task outputs.
#[derive(Default)]
pub struct TaskCache {
    entries: DashMap<CacheKey, DataNode<Dynamic>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TaskCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached output for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<DataNode<Dynamic>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `node` unless another output is already stored for `key`. Returns the retained
    /// output.
    pub fn insert(&self, key: CacheKey, node: DataNode<Dynamic>) -> DataNode<Dynamic> {
        self.entries.entry(key).or_insert(node).value().clone()
    }

    /// True if an output is stored for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Drop every entry. Trees handed out earlier stay valid.
    pub fn invalidate(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        info!(entries = dropped, "Task cache invalidated");
    }

    /// Drop the entries of one task. Returns how many were dropped.
    pub fn invalidate_task(&self, task: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.task != task);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups that found an entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for TaskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

/// Workspace decorator that memoizes task outputs.
///
/// Dependencies resolved during a run go through this decorator too, so upstream task
/// outputs are cached as well. A model opts out with `cache.enabled = false` in its meta.
pub struct CachingWorkspace {
    inner: Arc<dyn Workspace>,
    cache: Arc<TaskCache>,
    enabled: bool,
}

impl CachingWorkspace {
    /// Wrap `inner`, storing outputs in `cache`.
    pub fn new(inner: Arc<dyn Workspace>, cache: Arc<TaskCache>) -> Self {
        Self {
            inner,
            cache,
            enabled: true,
        }
    }

    /// Wrap `inner` using the cache registered in its context, if any, and the global switch
    /// from `config`.
    pub fn from_context(inner: Arc<dyn Workspace>, config: &ForgeConfig) -> Self {
        let cache = inner
            .context()
            .first_service::<TaskCache, _>(|_| true)
            .unwrap_or_default();
        Self::new(inner, cache).with_enabled(config.cache.enabled)
    }

    /// Global cache switch.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Backing cache.
    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    /// True if outputs of `model` are looked up and stored.
    pub fn caches(&self, model: &TaskModel) -> bool {
        self.enabled && model.meta().get_bool("cache.enabled").unwrap_or(true)
    }
}

impl Workspace for CachingWorkspace {
    fn context(&self) -> &Arc<Context> {
        self.inner.context()
    }

    fn data(&self) -> &DataNode<Dynamic> {
        self.inner.data()
    }

    fn opt_task(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.inner.opt_task(name)
    }

    fn opt_target(&self, name: &str) -> Option<Meta> {
        self.inner.opt_target(name)
    }

    fn run_model(&self, model: &TaskModel) -> ForgeResult<DataNode<Dynamic>> {
        let task = self.get_task(model.name())?;
        if !self.caches(model) {
            debug!(task = %model.name(), "Cache bypassed");
            return task.run(self, model);
        }

        let key = CacheKey::of(model);
        if let Some(node) = self.cache.get(&key) {
            debug!(key = %key, "Cache hit");
            return Ok(node);
        }
        debug!(key = %key, "Cache miss");
        let output = task.run(self, model)?;
        Ok(self.cache.insert(key, output))
    }

    fn as_dyn(&self) -> &dyn Workspace {
        self
    }
}

/// Plugin that provides a shared [`TaskCache`] as a context service.
///
/// Detaching the plugin invalidates the cache.
#[derive(Debug, Default)]
pub struct CachePlugin {
    cache: Arc<TaskCache>,
}

impl CachePlugin {
    /// Plugin with a fresh cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provided cache.
    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }
}

impl Plugin for CachePlugin {
    fn name(&self) -> &str {
        "cache"
    }

    fn attach(&self, services: &mut ServiceRegistry) {
        services.register(Arc::clone(&self.cache));
    }

    fn detach(&self) {
        self.cache.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_meta_name_and_order() {
        let a = Meta::builder("one").set("x", 1).set("y", 2).build();
        let b = Meta::builder("two").set("y", 2).set("x", 1).build();
        let c = Meta::builder("one").set("x", 2).set("y", 2).build();

        assert_eq!(CacheKey::new("fit", &a), CacheKey::new("fit", &b));
        assert_ne!(CacheKey::new("fit", &a), CacheKey::new("fit", &c));
        assert_ne!(CacheKey::new("fit", &a), CacheKey::new("plot", &a));
    }

    #[test]
    fn test_first_insert_is_retained() {
        let cache = TaskCache::new();
        let key = CacheKey::new("t", &Meta::empty());
        let first = DataNode::<Dynamic>::empty("first");
        let second = DataNode::<Dynamic>::empty("second");

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.insert(key.clone(), first).name(), "first");
        assert_eq!(cache.insert(key.clone(), second).name(), "first");
        assert_eq!(cache.get(&key).map(|n| n.name().to_string()), Some("first".to_string()));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn test_invalidate_task() {
        let cache = TaskCache::new();
        cache.insert(CacheKey::new("a", &Meta::empty()), DataNode::empty("a"));
        cache.insert(CacheKey::new("b", &Meta::empty()), DataNode::empty("b"));

        assert_eq!(cache.invalidate_task("a"), 1);
        assert_eq!(cache.len(), 1);
        cache.invalidate();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_plugin_detach_invalidates() {
        let plugin = Arc::new(CachePlugin::new());
        let cache = Arc::clone(plugin.cache());
        let context = Context::builder("cache").plugin(plugin).build();

        let service = context.first_service::<TaskCache, _>(|_| true).unwrap();
        assert!(Arc::ptr_eq(&service, &cache));

        cache.insert(CacheKey::new("t", &Meta::empty()), DataNode::empty("t"));
        assert!(context.detach_plugin("cache"));
        assert!(cache.is_empty());
        assert!(context.services::<TaskCache>().is_empty());
    }
}
