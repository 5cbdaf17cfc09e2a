//! # Rust Forge
//!
//! Lazy, dependency-driven data analysis. Analyses are declared as named tasks over
//! hierarchical data trees; running a task only wires a graph of memoized goals, and values
//! are computed when an output item is awaited.
//!
//! ## Crate Structure
//!
//! - **`forge_core`** (re-exported below): goals, metas, laminates, data items and trees.
//! - **`config`**: Figment-based configuration, including named targets. See `config::ForgeConfig`.
//! - **`logging`**: `tracing` subscriber setup driven by the configuration.
//! - **`context`**: the shared dispatcher, typed service registry and plugins.
//! - **`task`**: the `Task` trait, task models and the stock `MapTask` and `PipelineTask`.
//! - **`workspace`**: task and target registries, the output cache and the reloading wrapper.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_forge::context::Context;
//! use rust_forge::task::MapTask;
//! use rust_forge::workspace::{BasicWorkspace, Workspace};
//! use rust_forge::Meta;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let workspace = BasicWorkspace::builder(Context::new("demo"))
//!     .static_data("x", 1_i64)
//!     .task(Arc::new(MapTask::new("inc", |_: &Meta, x: i64| Ok(x + 1))))
//!     .build();
//!
//! let output = workspace.run_task("inc", &Meta::empty())?;
//! let x = output.get_data("x")?.downcast::<i64>()?.wait().await?;
//! assert_eq!(x, 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod logging;
pub mod task;
pub mod workspace;

pub use forge_core::{data, error, filter, goal, laminate, meta, node};
pub use forge_core::{
    AnyGoal, ComputeReport, Data, DataFilter, DataNode, DataNodeBuilder, Dispatcher, Dynamic,
    ForgeError, ForgeResult, Goal, GoalError, GoalListener, GoalState, Laminate, Meta,
    MetaBuilder, Outcome, Value,
};
