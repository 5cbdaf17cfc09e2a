use std::fmt;
use std::sync::Arc;

use forge_core::{DataNode, Dynamic, ForgeError, ForgeResult, Meta};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ModelHook, Task, TaskModel, TaskModelBuilder};
use crate::workspace::Workspace;

/// One named transformation of a [`PipelineTask`].
pub type Stage = Arc<dyn Fn(&Meta, DataNode<Dynamic>) -> ForgeResult<DataNode<Dynamic>> + Send + Sync>;

/// Intermediate result published after each pipeline stage.
#[derive(Debug, Clone)]
pub struct StageEvent {
    /// Pipeline task name
    pub task: String,
    /// Stage name
    pub stage: String,
    /// Zero-based stage position
    pub index: usize,
    /// Tree produced by the stage
    pub node: DataNode<Dynamic>,
}

/// Threads the gathered input through an ordered list of named stages.
///
/// Every intermediate tree is broadcast to [`PipelineTask::subscribe`] receivers. With stage
/// recording enabled (builder flag, or `record_stages = true` in the task meta) the output
/// also carries each intermediate tree under `stages.<stage>`.
pub struct PipelineTask {
    name: String,
    stages: Vec<(String, Stage)>,
    record: bool,
    model: Option<ModelHook>,
    events: broadcast::Sender<StageEvent>,
}

impl PipelineTask {
    /// Empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            stages: Vec::new(),
            record: false,
            model: None,
            events,
        }
    }

    /// Append a stage.
    pub fn stage<F>(mut self, name: impl Into<String>, stage: F) -> Self
    where
        F: Fn(&Meta, DataNode<Dynamic>) -> ForgeResult<DataNode<Dynamic>> + Send + Sync + 'static,
    {
        self.stages.push((name.into(), Arc::new(stage)));
        self
    }

    /// Record intermediate trees in the output by default.
    pub fn record_stages(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    /// Declare the task inputs. Without a hook the whole root tree is used.
    pub fn with_model<H>(mut self, hook: H) -> Self
    where
        H: Fn(&mut TaskModelBuilder, &Meta) -> ForgeResult<()> + Send + Sync + 'static,
    {
        self.model = Some(Arc::new(hook));
        self
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    /// Receive stage events of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }
}

impl Task for PipelineTask {
    fn name(&self) -> &str {
        &self.name
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

    fn validate(&self, _model: &TaskModel) -> ForgeResult<()> {
        if self.stages.is_empty() {
            return Err(ForgeError::validation(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }
        Ok(())
    }

    fn transform(
        &self,
        _workspace: &dyn Workspace,
        model: &TaskModel,
        input: DataNode<Dynamic>,
    ) -> ForgeResult<DataNode<Dynamic>> {
        let record = model.meta().get_bool("record_stages").unwrap_or(self.record);
        let mut recorded = Vec::new();
        let mut current = input;

        for (index, (stage, apply)) in self.stages.iter().enumerate() {
            current = apply(model.meta(), current)?;
            let event = StageEvent {
                task: self.name.clone(),
                stage: stage.clone(),
                index,
                node: current.clone(),
            };
            if self.events.send(event).is_err() {
                debug!(task = %self.name, stage = %stage, "No stage subscribers");
            }
            if record {
                recorded.push((stage.as_str(), current.clone()));
            }
        }

        if recorded.is_empty() {
            return Ok(current);
        }
        let mut output = current.edit();
        for (stage, node) in &recorded {
            output.put_node(&format!("stages.{}", stage), node);
        }
        Ok(output.build())
    }
}

impl fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTask")
            .field("name", &self.name)
            .field("stages", &self.stage_names().collect::<Vec<_>>())
            .field("record", &self.record)
            .finish()
    }
}
