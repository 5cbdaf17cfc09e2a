use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use forge_core::{Data, DataNode, Dynamic, ForgeResult, Goal, Meta};
use tracing::debug;

use super::{ModelHook, Task, TaskModel, TaskModelBuilder};
use crate::workspace::Workspace;

type Mapper<I, O> = Arc<dyn Fn(&Meta, I) -> anyhow::Result<O> + Send + Sync>;

/// Applies a function to every input item, lazily and independently.
///
/// Each output item is its own goal with id `<task>.<path>`, so a failing item only fails
/// when it is awaited. Without a model hook the task consumes the whole root tree.
pub struct MapTask<I, O> {
    name: String,
    mapper: Mapper<I, O>,
    model: Option<ModelHook>,
}

impl<I, O> MapTask<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Create a map task. The function receives the resolved task meta and one input value.
    pub fn new<F>(name: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(&Meta, I) -> anyhow::Result<O> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            mapper: Arc::new(mapper),
            model: None,
        }
    }

    /// Declare the task inputs.
    pub fn with_model<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut TaskModelBuilder, &Meta) -> ForgeResult<()> + Send + Sync + 'static,
    {
        self.model = Some(Arc::new(hook));
        self
    }
}

impl<I, O> Task for MapTask<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn output_type(&self) -> &'static str {
        type_name::<O>()
    }

    fn build_model(&self, builder: &mut TaskModelBuilder, meta: &Meta) -> ForgeResult<()> {
        match &self.model {
            Some(hook) => hook(builder, meta),
            None => {
                builder.all_data("");
                Ok(())
            }
        }
    }

    fn transform(
        &self,
        workspace: &dyn Workspace,
        model: &TaskModel,
        input: DataNode<Dynamic>,
    ) -> ForgeResult<DataNode<Dynamic>> {
        let typed = input.checked::<I>()?;
        let dispatcher = workspace.context().dispatcher();

        let mut output = DataNode::<O>::builder(self.name.clone());
        output.set_meta(model.meta().clone());
        for (path, data) in typed.items(true) {
            let mapper = Arc::clone(&self.mapper);
            let meta = model.meta().clone();
            let source = data.goal().clone();
            let goal = Goal::new(
                format!("{}.{}", self.name, path),
                dispatcher.clone(),
                vec![source.as_dependency()],
                async move {
                    let value = source.wait().await?;
                    mapper(&meta, value)
                },
            );
            output.put_data(&path, Data::new(data.name(), goal, data.meta().clone()));
        }
        debug!(task = %self.name, items = typed.count(true), "Map task wired");
        Ok(output.build().erase())
    }
}

impl<I, O> fmt::Debug for MapTask<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapTask")
            .field("name", &self.name)
            .field("input", &type_name::<I>())
            .field("output", &type_name::<O>())
            .finish()
    }
}
