//! Workspaces: registries of tasks and targets over a root data tree.
//!
//! [`BasicWorkspace`] is built once and is read-only afterwards, so lookups need no locking.
//! Caching and reloading are separate decorators over the [`Workspace`] trait:
//!
//! - [`CachingWorkspace`] memoizes task outputs by task name and meta digest
//! - [`ReloadingWorkspace`] rebuilds a workspace when its description file changes

mod cache;
mod reload;

pub use cache::{CacheKey, CachePlugin, CachingWorkspace, TaskCache};
pub use reload::ReloadingWorkspace;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use forge_core::{Data, DataNode, DataNodeBuilder, Dynamic, ForgeError, ForgeResult, Laminate, Meta};
use tracing::{debug, info, warn};

use crate::config::ForgeConfig;
use crate::context::Context;
use crate::task::{Task, TaskModel};

/// Meta key naming the parent of a target.
pub const PARENT_KEY: &str = "@parent";

/// Resolves and executes tasks by name.
pub trait Workspace: Send + Sync {
    /// Shared context.
    fn context(&self) -> &Arc<Context>;

    /// Root data tree.
    fn data(&self) -> &DataNode<Dynamic>;

    /// Task by exact name.
    fn opt_task(&self, name: &str) -> Option<Arc<dyn Task>>;

    /// Target meta by exact name, with `@parent` chains resolved.
    fn opt_target(&self, name: &str) -> Option<Meta>;

    /// Execute a built model.
    fn run_model(&self, model: &TaskModel) -> ForgeResult<DataNode<Dynamic>>;

    /// This workspace as a trait object.
    fn as_dyn(&self) -> &dyn Workspace;

    /// Task by exact name, failing with [`ForgeError::NotFound`].
    fn get_task(&self, name: &str) -> ForgeResult<Arc<dyn Task>> {
        self.opt_task(name)
            .ok_or_else(|| ForgeError::not_found("task", name))
    }

    /// Target by exact name, failing with [`ForgeError::NotFound`].
    fn get_target(&self, name: &str) -> ForgeResult<Meta> {
        self.opt_target(name)
            .ok_or_else(|| ForgeError::not_found("target", name))
    }

    /// Build the model `task` would run with under `meta`.
    fn build_model(&self, task: &str, meta: &Meta) -> ForgeResult<TaskModel> {
        self.get_task(task)?.build(self.as_dyn(), meta)
    }

    /// Build and run `task` under `meta`.
    fn run_task(&self, task: &str, meta: &Meta) -> ForgeResult<DataNode<Dynamic>> {
        let model = self.build_model(task, meta)?;
        self.run_model(&model)
    }

    /// Run `task` with the meta of a named target.
    fn run_target(&self, task: &str, target: &str) -> ForgeResult<DataNode<Dynamic>> {
        let meta = self.get_target(target)?;
        self.run_task(task, &meta)
    }
}

/// Plain workspace without caching.
pub struct BasicWorkspace {
    context: Arc<Context>,
    data: DataNode<Dynamic>,
    tasks: HashMap<String, Arc<dyn Task>>,
    targets: HashMap<String, Meta>,
}

impl BasicWorkspace {
    /// Start building a workspace on `context`.
    pub fn builder(context: Arc<Context>) -> WorkspaceBuilder {
        WorkspaceBuilder {
            context,
            data: DataNode::builder("data"),
            tasks: HashMap::new(),
            targets: HashMap::new(),
        }
    }

    /// Names of registered tasks, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names of registered targets, sorted.
    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn resolve_target(&self, name: &str) -> Option<Meta> {
        let mut layers = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(name.to_string());

        while let Some(current) = next.take() {
            if !visited.insert(current.clone()) {
                warn!(target_name = %name, parent = %current, "Cyclic target parent ignored");
                break;
            }
            let Some(meta) = self.targets.get(&current) else {
                if layers.is_empty() {
                    return None;
                }
                warn!(target_name = %name, parent = %current, "Unknown target parent ignored");
                break;
            };
            next = meta.get_str(PARENT_KEY).map(str::to_string);
            layers.push(meta.clone());
        }

        let merged = Laminate::new(layers).merge();
        Some(merged.edit().remove(PARENT_KEY).name(name).build())
    }
}

impl Workspace for BasicWorkspace {
    fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn data(&self) -> &DataNode<Dynamic> {
        &self.data
    }

    fn opt_task(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    fn opt_target(&self, name: &str) -> Option<Meta> {
        self.resolve_target(name)
    }

    fn run_model(&self, model: &TaskModel) -> ForgeResult<DataNode<Dynamic>> {
        let task = self.get_task(model.name())?;
        info!(task = %model.name(), dependencies = model.dependencies().len(), "Running task");
        task.run(self, model)
    }

    fn as_dyn(&self) -> &dyn Workspace {
        self
    }
}

impl fmt::Debug for BasicWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicWorkspace")
            .field("context", &self.context.name())
            .field("tasks", &self.task_names())
            .field("targets", &self.target_names())
            .field("data", &self.data.count(true))
            .finish()
    }
}

/// Builder for [`BasicWorkspace`].
pub struct WorkspaceBuilder {
    context: Arc<Context>,
    data: DataNodeBuilder<Dynamic>,
    tasks: HashMap<String, Arc<dyn Task>>,
    targets: HashMap<String, Meta>,
}

impl WorkspaceBuilder {
    /// Put a data item into the root tree.
    pub fn data(mut self, path: &str, data: Data<Dynamic>) -> Self {
        self.data.put_data(path, data);
        self
    }

    /// Put an already known value into the root tree.
    pub fn static_data<T: Clone + Send + Sync + 'static>(mut self, path: &str, value: T) -> Self {
        self.data.put_data(path, Data::ready(path, value).erase());
        self
    }

    /// Put a whole tree under `path`, or merge it into the root when `path` is empty.
    pub fn node<T: Clone + Send + Sync + 'static>(mut self, path: &str, node: &DataNode<T>) -> Self {
        let node = node.erase();
        if path.is_empty() {
            self.data.update(&node);
        } else {
            self.data.put_node(path, &node);
        }
        self
    }

    /// Register a task under its own name. A task with the same name is replaced.
    pub fn task(mut self, task: Arc<dyn Task>) -> Self {
        self.tasks.insert(task.name().to_string(), task);
        self
    }

    /// Register a named target.
    pub fn target(mut self, name: impl Into<String>, meta: Meta) -> Self {
        self.targets.insert(name.into(), meta);
        self
    }

    /// Register every target declared in the configuration.
    pub fn targets_from_config(mut self, config: &ForgeConfig) -> Self {
        self.targets.extend(config.target_metas());
        self
    }

    /// Freeze the workspace.
    ///
    /// Tasks advertised by the context's plugins are added unless a task with the same name
    /// was registered explicitly.
    pub fn build(mut self) -> BasicWorkspace {
        for task in self.context.plugin_tasks() {
            let name = task.name().to_string();
            if self.tasks.contains_key(&name) {
                debug!(task = %name, "Plugin task shadowed by explicit task");
                continue;
            }
            debug!(task = %name, "Plugin task registered");
            self.tasks.insert(name, task);
        }
        let workspace = BasicWorkspace {
            context: self.context,
            data: self.data.build(),
            tasks: self.tasks,
            targets: self.targets,
        };
        info!(
            tasks = workspace.tasks.len(),
            targets = workspace.targets.len(),
            data = workspace.data.count(true),
            "Workspace built"
        );
        workspace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Plugin;
    use crate::task::MapTask;
    use tracing_test::traced_test;

    fn parented(name: &str, parent: &str, key: &str, value: i64) -> Meta {
        Meta::builder(name)
            .set(PARENT_KEY, parent)
            .set(key, value)
            .build()
    }

    fn workspace() -> BasicWorkspace {
        BasicWorkspace::builder(Context::new("test"))
            .static_data("x", 1_i64)
            .target(
                "base",
                Meta::builder("base")
                    .set("a", 1)
                    .set("b", 2)
                    .set("fit.order", 2)
                    .build(),
            )
            .target(
                "child",
                Meta::builder("child")
                    .set(PARENT_KEY, "base")
                    .set("b", 20)
                    .set("fit.method", "lsq")
                    .build(),
            )
            .target("grandchild", parented("grandchild", "child", "a", 100))
            .target("loop_a", parented("loop_a", "loop_b", "v", 1))
            .target("loop_b", parented("loop_b", "loop_a", "w", 2))
            .build()
    }

    #[test]
    fn test_target_laminate_override() {
        let ws = workspace();
        let child = ws.get_target("child").unwrap();
        assert_eq!(child.get_i64("a"), Some(1));
        assert_eq!(child.get_i64("b"), Some(20));
        assert_eq!(child.get_i64("fit.order"), Some(2));
        assert_eq!(child.get_str("fit.method"), Some("lsq"));
        assert!(!child.has(PARENT_KEY));

        let grandchild = ws.get_target("grandchild").unwrap();
        assert_eq!(grandchild.get_i64("a"), Some(100));
        assert_eq!(grandchild.get_i64("b"), Some(20));
    }

    #[test]
    #[traced_test]
    fn test_target_cycle_terminates() {
        let ws = workspace();
        let target = ws.get_target("loop_a").unwrap();
        assert_eq!(target.get_i64("v"), Some(1));
        assert_eq!(target.get_i64("w"), Some(2));
        assert!(logs_contain("Cyclic target parent ignored"));
    }

    #[test]
    fn test_lookup_is_exact() {
        let ws = workspace();
        assert!(matches!(
            ws.get_target("Base"),
            Err(ForgeError::NotFound { kind: "target", .. })
        ));
        assert!(matches!(
            ws.get_task("anything"),
            Err(ForgeError::NotFound { kind: "task", .. })
        ));
    }

    struct TaskPlugin;

    impl Plugin for TaskPlugin {
        fn name(&self) -> &str {
            "tasks"
        }

        fn tasks(&self) -> Vec<Arc<dyn Task>> {
            vec![
                Arc::new(MapTask::new("double", |_: &Meta, x: i64| Ok(x * 2))),
                Arc::new(MapTask::new("explicit", |_: &Meta, x: i64| Ok(x - 1))),
            ]
        }
    }

    #[test]
    fn test_plugin_tasks_do_not_override_explicit() {
        let context = Context::builder("plugins").plugin(Arc::new(TaskPlugin)).build();
        let ws = BasicWorkspace::builder(context)
            .task(Arc::new(MapTask::new("explicit", |_: &Meta, x: i64| Ok(x + 1))))
            .static_data("x", 5_i64)
            .build();

        assert_eq!(ws.task_names(), vec!["double", "explicit"]);

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let out = runtime.block_on(async {
            let node = ws.run_task("explicit", &Meta::empty()).unwrap();
            let data = node.get_data("x").unwrap().downcast::<i64>().unwrap();
            data.wait().await.unwrap()
        });
        assert_eq!(out, 6);
    }
}
