//! Process-wide context: dispatcher, typed services and plugins.
//!
//! The engine never looks services up by reflection. Providers are registered under the
//! type they are requested as (usually a trait object such as `dyn OutputSink`) and queried
//! with [`Context::services`] or [`Context::first_service`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Context                    │
//! │  Dispatcher   ServiceRegistry   Plugins      │
//! │               TypeId -> [Arc<S>]  name -> P  │
//! └──────────────────────────────────────────────┘
//!        │                │               │
//!   goal bodies     OutputSink,      Task providers
//!                   TaskCache, ...
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use forge_core::{DataNode, Dispatcher, Dynamic, Meta};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::task::Task;

struct ServiceEntry {
    owner: Option<String>,
    service: Box<dyn Any + Send + Sync>,
}

/// Typed service registry.
///
/// Services are stored as `Arc<S>` keyed by the type `S` they were registered as, so `S` may
/// be a trait object.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, Vec<ServiceEntry>>,
}

impl ServiceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider of `S`.
    pub fn register<S: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<S>) {
        self.insert::<S>(None, service);
    }

    fn insert<S: ?Sized + Send + Sync + 'static>(&mut self, owner: Option<String>, service: Arc<S>) {
        self.services
            .entry(TypeId::of::<S>())
            .or_default()
            .push(ServiceEntry {
                owner,
                service: Box::new(service),
            });
    }

    /// All providers of `S` in registration order.
    pub fn services<S: ?Sized + Send + Sync + 'static>(&self) -> Vec<Arc<S>> {
        self.services
            .get(&TypeId::of::<S>())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.service.downcast_ref::<Arc<S>>().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First provider of `S` accepted by `predicate`.
    pub fn first_service<S, P>(&self, predicate: P) -> Option<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
        P: Fn(&S) -> bool,
    {
        self.services::<S>()
            .into_iter()
            .find(|service| predicate(service.as_ref()))
    }

    /// Number of registered providers of any type.
    pub fn len(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn absorb(&mut self, owner: &str, other: ServiceRegistry) {
        for (type_id, entries) in other.services {
            let target = self.services.entry(type_id).or_default();
            target.extend(entries.into_iter().map(|entry| ServiceEntry {
                owner: Some(owner.to_string()),
                service: entry.service,
            }));
        }
    }

    fn remove_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for entries in self.services.values_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.owner.as_deref() != Some(owner));
            removed += before - entries.len();
        }
        self.services.retain(|_, entries| !entries.is_empty());
        removed
    }
}

/// A loadable bundle of tasks and services.
pub trait Plugin: Send + Sync {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Tasks advertised to workspaces built on this context.
    fn tasks(&self) -> Vec<Arc<dyn Task>> {
        Vec::new()
    }

    /// Register the services this plugin provides.
    fn attach(&self, _services: &mut ServiceRegistry) {}

    /// Release plugin resources. Services registered in `attach` are removed by the context.
    fn detach(&self) {}
}

/// External consumer of task outputs.
///
/// Outputs are pushed while still lazy; sinks decide whether and when to compute them.
pub trait OutputSink: Send + Sync {
    /// Receive the output of one task run.
    fn push(&self, task: &str, meta: &Meta, output: &DataNode<Dynamic>);
}

/// Shared environment of workspaces.
pub struct Context {
    name: String,
    dispatcher: Option<Dispatcher>,
    services: RwLock<ServiceRegistry>,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl Context {
    /// Context with no services or plugins, dispatching on the ambient runtime.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::builder(name).build()
    }

    /// Start configuring a context.
    pub fn builder(name: impl Into<String>) -> ContextBuilder {
        ContextBuilder {
            name: name.into(),
            dispatcher: None,
            services: ServiceRegistry::new(),
            plugins: Vec::new(),
        }
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured dispatcher, or the runtime of the caller.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.dispatcher.clone().or_else(Dispatcher::try_current)
    }

    /// Register a provider of `S`.
    pub fn register_service<S: ?Sized + Send + Sync + 'static>(&self, service: Arc<S>) {
        self.services.write().register(service);
    }

    /// All providers of `S`.
    pub fn services<S: ?Sized + Send + Sync + 'static>(&self) -> Vec<Arc<S>> {
        self.services.read().services::<S>()
    }

    /// First provider of `S` accepted by `predicate`.
    pub fn first_service<S, P>(&self, predicate: P) -> Option<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
        P: Fn(&S) -> bool,
    {
        self.services.read().first_service(predicate)
    }

    /// Attach a plugin. A plugin with the same name is detached first.
    pub fn load_plugin(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        self.detach_plugin(&name);

        let mut provided = ServiceRegistry::new();
        plugin.attach(&mut provided);
        let count = provided.len();
        self.services.write().absorb(&name, provided);
        self.plugins.write().push(plugin);
        info!(context = %self.name, plugin = %name, services = count, "Plugin attached");
    }

    /// Detach a plugin by name and drop the services it registered.
    ///
    /// Returns false if no such plugin is loaded.
    pub fn detach_plugin(&self, name: &str) -> bool {
        let plugin = {
            let mut plugins = self.plugins.write();
            match plugins.iter().position(|p| p.name() == name) {
                Some(index) => plugins.remove(index),
                None => return false,
            }
        };
        plugin.detach();
        let removed = self.services.write().remove_owner(name);
        info!(context = %self.name, plugin = %name, services = removed, "Plugin detached");
        true
    }

    /// Loaded plugins in load order.
    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.read().clone()
    }

    /// Tasks advertised by all loaded plugins. Later duplicates are skipped.
    pub fn plugin_tasks(&self) -> Vec<Arc<dyn Task>> {
        let mut seen = std::collections::HashSet::new();
        let mut tasks = Vec::new();
        for plugin in self.plugins() {
            for task in plugin.tasks() {
                if seen.insert(task.name().to_string()) {
                    tasks.push(task);
                } else {
                    warn!(plugin = %plugin.name(), task = %task.name(), "Duplicate plugin task ignored");
                }
            }
        }
        debug!(context = %self.name, count = tasks.len(), "Collected plugin tasks");
        tasks
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("services", &self.services.read().len())
            .field(
                "plugins",
                &self
                    .plugins
                    .read()
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    name: String,
    dispatcher: Option<Dispatcher>,
    services: ServiceRegistry,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ContextBuilder {
    /// Use an explicit dispatcher for all goals created through this context.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Register a provider of `S`.
    pub fn service<S: ?Sized + Send + Sync + 'static>(mut self, service: Arc<S>) -> Self {
        self.services.register(service);
        self
    }

    /// Load a plugin when the context is built.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Build the shared context.
    pub fn build(self) -> Arc<Context> {
        let context = Arc::new(Context {
            name: self.name,
            dispatcher: self.dispatcher,
            services: RwLock::new(self.services),
            plugins: RwLock::new(Vec::new()),
        });
        for plugin in self.plugins {
            context.load_plugin(plugin);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    trait Greeter: Send + Sync {
        fn language(&self) -> &str;
    }

    struct English;
    impl Greeter for English {
        fn language(&self) -> &str {
            "en"
        }
    }

    struct French;
    impl Greeter for French {
        fn language(&self) -> &str {
            "fr"
        }
    }

    #[test]
    fn test_typed_lookup() {
        let mut registry = ServiceRegistry::new();
        registry.register::<dyn Greeter>(Arc::new(English));
        registry.register::<dyn Greeter>(Arc::new(French));
        registry.register(Arc::new(42_u32));

        assert_eq!(registry.services::<dyn Greeter>().len(), 2);
        let french = registry.first_service::<dyn Greeter, _>(|g| g.language() == "fr");
        assert_eq!(french.map(|g| g.language().to_string()), Some("fr".to_string()));
        assert_eq!(registry.services::<u32>().len(), 1);
        assert!(registry.services::<String>().is_empty());
    }

    struct GreeterPlugin {
        detached: AtomicBool,
    }

    impl Plugin for GreeterPlugin {
        fn name(&self) -> &str {
            "greeter"
        }

        fn attach(&self, services: &mut ServiceRegistry) {
            services.register::<dyn Greeter>(Arc::new(English));
        }

        fn detach(&self) {
            self.detached.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_plugin_services_follow_plugin() {
        let plugin = Arc::new(GreeterPlugin {
            detached: AtomicBool::new(false),
        });
        let context = Context::builder("test")
            .service::<dyn Greeter>(Arc::new(French))
            .plugin(plugin.clone())
            .build();

        assert_eq!(context.services::<dyn Greeter>().len(), 2);
        assert!(context.detach_plugin("greeter"));
        assert!(plugin.detached.load(Ordering::SeqCst));
        assert!(!context.detach_plugin("greeter"));

        let remaining = context.services::<dyn Greeter>();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].language(), "fr");
        assert!(context.plugins().is_empty());
    }
}
