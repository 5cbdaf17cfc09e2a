//! Task framework
//!
//! A task is a named computation stage that turns an input data tree into an output data
//! tree under a resolved configuration.
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ build(workspace, meta)                                       │
//! │   TaskModelBuilder::new → build_model hook → TaskModel       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ run(workspace, model)                                        │
//! │   validate() → gather() → transform() → handle()             │
//! │   sync         lazy graph   lazy graph   sinks, logging      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `validate` fails before anything is scheduled. `gather` and `transform` only wire goals
//! together; values are computed when an output item is awaited, and a failing item does not
//! affect its siblings.
//!
//! # Example
//!
//! ```rust,no_run
//! use rust_forge::task::{MapTask, TaskModelBuilder};
//! use forge_core::{ForgeResult, Meta};
//!
//! // output = input + meta.offset, for every root item
//! let task = MapTask::new("shift", |meta: &Meta, x: i64| {
//!     Ok(x + meta.get_i64("offset").unwrap_or(0))
//! })
//! .with_model(|builder: &mut TaskModelBuilder, _meta: &Meta| -> ForgeResult<()> {
//!     builder.all_data("");
//!     Ok(())
//! });
//! ```

mod map;
mod model;
mod pipeline;

pub use map::MapTask;
pub use model::{Dependency, MetaTransform, TaskModel, TaskModelBuilder};
pub use pipeline::{PipelineTask, Stage, StageEvent};

use std::any::type_name;
use std::sync::Arc;

use forge_core::{DataNode, Dynamic, ForgeResult, Meta};
use tracing::info;

use crate::context::OutputSink;
use crate::workspace::Workspace;

/// Hook that declares a task's inputs on its model builder.
pub type ModelHook = Arc<dyn Fn(&mut TaskModelBuilder, &Meta) -> ForgeResult<()> + Send + Sync>;

/// A named computation stage.
pub trait Task: Send + Sync {
    /// Unique task name
    fn name(&self) -> &str;

    /// Declared element type of the output tree.
    fn output_type(&self) -> &'static str {
        type_name::<Dynamic>()
    }

    /// Declare dependencies for one invocation. `meta` is the resolved task meta.
    fn build_model(&self, _builder: &mut TaskModelBuilder, _meta: &Meta) -> ForgeResult<()> {
        Ok(())
    }

    /// Build the model of one invocation from a configuration.
    fn build(&self, _workspace: &dyn Workspace, config: &Meta) -> ForgeResult<TaskModel> {
        let mut builder = TaskModelBuilder::new(self.name(), config);
        let meta = builder.meta().clone();
        self.build_model(&mut builder, &meta)?;
        Ok(builder.build())
    }

    /// Synchronous precondition checks.
    fn validate(&self, _model: &TaskModel) -> ForgeResult<()> {
        Ok(())
    }

    /// Resolve the model's dependencies into one input tree.
    fn gather(&self, workspace: &dyn Workspace, model: &TaskModel) -> ForgeResult<DataNode<Dynamic>> {
        model.gather(workspace)
    }

    /// Task-specific transformation of the gathered input.
    fn transform(
        &self,
        workspace: &dyn Workspace,
        model: &TaskModel,
        input: DataNode<Dynamic>,
    ) -> ForgeResult<DataNode<Dynamic>>;

    /// Side effects on the produced output. Pushes it to every registered [`OutputSink`].
    fn handle(&self, workspace: &dyn Workspace, model: &TaskModel, output: &DataNode<Dynamic>) {
        info!(task = %self.name(), items = output.count(true), "Task output ready");
        for sink in workspace.context().services::<dyn OutputSink>() {
            sink.push(self.name(), model.meta(), output);
        }
    }

    /// Full run: validate, gather, transform, handle.
    fn run(&self, workspace: &dyn Workspace, model: &TaskModel) -> ForgeResult<DataNode<Dynamic>> {
        self.validate(model)?;
        let input = self.gather(workspace, model)?;
        let output = self.transform(workspace, model, input)?;
        self.handle(workspace, model, &output);
        Ok(output)
    }
}
