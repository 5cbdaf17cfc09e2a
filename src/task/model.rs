//! Resolved description of one task invocation.

use std::fmt;
use std::sync::Arc;

use forge_core::{DataFilter, DataNode, DataNodeBuilder, Dynamic, ForgeResult, Meta};
use tracing::trace;

use crate::workspace::Workspace;

/// Rewrites the meta handed to a dependency task.
pub type MetaTransform = Arc<dyn Fn(&Meta) -> Meta + Send + Sync>;

/// One input declaration of a [`TaskModel`].
#[derive(Clone)]
pub enum Dependency {
    /// Root data selected by a filter
    Data {
        /// Selection over the workspace root tree
        filter: DataFilter,
        /// Node the selection is attached under; empty merges at the root
        alias: String,
    },
    /// Output of another task
    Task {
        /// Name of the task to run
        task: String,
        /// Optional rewrite of the depending model's meta
        transform: Option<MetaTransform>,
        /// Node the output is attached under; empty merges at the root
        alias: String,
    },
}

impl Dependency {
    /// Alias the resolved node is attached under.
    pub fn alias(&self) -> &str {
        match self {
            Dependency::Data { alias, .. } | Dependency::Task { alias, .. } => alias,
        }
    }

    /// Resolve into `target`. Builds the lazy graph only; nothing is awaited.
    pub fn apply(
        &self,
        workspace: &dyn Workspace,
        meta: &Meta,
        target: &mut DataNodeBuilder<Dynamic>,
    ) -> ForgeResult<()> {
        let node = match self {
            Dependency::Data { filter, .. } => workspace.data().filter(filter),
            Dependency::Task {
                task, transform, ..
            } => {
                let meta = match transform {
                    Some(transform) => transform(meta),
                    None => meta.clone(),
                };
                workspace.run_task(task, &meta)?
            }
        };
        trace!(alias = %self.alias(), items = node.count(true), "Dependency resolved");
        attach(target, self.alias(), &node);
        Ok(())
    }
}

fn attach(target: &mut DataNodeBuilder<Dynamic>, alias: &str, node: &DataNode<Dynamic>) {
    if alias.is_empty() {
        target.update(node);
    } else {
        target.put_node(alias, node);
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Data { filter, alias } => f
                .debug_struct("Data")
                .field("filter", filter)
                .field("alias", alias)
                .finish(),
            Dependency::Task {
                task,
                transform,
                alias,
            } => f
                .debug_struct("Task")
                .field("task", task)
                .field("transform", &transform.is_some())
                .field("alias", alias)
                .finish(),
        }
    }
}

/// Task name, ordered dependencies and resolved meta of one run.
#[derive(Debug, Clone)]
pub struct TaskModel {
    name: String,
    meta: Meta,
    dependencies: Vec<Dependency>,
}

impl TaskModel {
    /// Start a model for `task`, resolving its meta from `config`.
    pub fn builder(task: impl Into<String>, config: &Meta) -> TaskModelBuilder {
        TaskModelBuilder::new(task, config)
    }

    /// Name of the task to run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved meta.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Dependencies in declaration order.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Resolve every dependency, in order, into one input tree.
    ///
    /// Later dependencies overwrite earlier ones under the same alias.
    pub fn gather(&self, workspace: &dyn Workspace) -> ForgeResult<DataNode<Dynamic>> {
        let mut builder = DataNode::builder(self.name.clone());
        builder.set_meta(self.meta.clone());
        for dependency in &self.dependencies {
            dependency.apply(workspace, &self.meta, &mut builder)?;
        }
        Ok(builder.build())
    }
}

/// Builder for [`TaskModel`].
#[derive(Debug, Clone)]
pub struct TaskModelBuilder {
    name: String,
    meta: Meta,
    dependencies: Vec<Dependency>,
}

impl TaskModelBuilder {
    /// The model meta is the sub-node of `config` named after the task, or the whole
    /// `config` when there is no such node.
    pub fn new(task: impl Into<String>, config: &Meta) -> Self {
        let name = task.into();
        let meta = config.node(&name).cloned().unwrap_or_else(|| config.clone());
        Self {
            name,
            meta,
            dependencies: Vec::new(),
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current resolved meta.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Replace the resolved meta.
    pub fn set_meta(&mut self, meta: Meta) -> &mut Self {
        self.meta = meta;
        self
    }

    /// Select root data whose full path matches `mask`.
    pub fn data(&mut self, mask: &str, alias: &str) -> ForgeResult<&mut Self> {
        let filter = DataFilter::pattern(mask)?;
        Ok(self.data_filter(filter, alias))
    }

    /// Select root data with an arbitrary filter.
    pub fn data_filter(&mut self, filter: DataFilter, alias: &str) -> &mut Self {
        self.dependencies.push(Dependency::Data {
            filter,
            alias: alias.to_string(),
        });
        self
    }

    /// Select the whole root tree.
    pub fn all_data(&mut self, alias: &str) -> &mut Self {
        self.data_filter(DataFilter::Identity, alias)
    }

    /// Depend on the output of `task`, run with this model's meta.
    pub fn depends_on(&mut self, task: &str, alias: &str) -> &mut Self {
        self.dependencies.push(Dependency::Task {
            task: task.to_string(),
            transform: None,
            alias: alias.to_string(),
        });
        self
    }

    /// Depend on the output of `task`, run with a rewritten meta.
    pub fn depends_on_with<F>(&mut self, task: &str, alias: &str, transform: F) -> &mut Self
    where
        F: Fn(&Meta) -> Meta + Send + Sync + 'static,
    {
        self.dependencies.push(Dependency::Task {
            task: task.to_string(),
            transform: Some(Arc::new(transform)),
            alias: alias.to_string(),
        });
        self
    }

    /// Freeze the model.
    pub fn build(&self) -> TaskModel {
        TaskModel {
            name: self.name.clone(),
            meta: self.meta.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}
