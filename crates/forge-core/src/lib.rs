//! `forge-core`
//!
//! Building blocks of the rust_forge analysis engine: configuration values, lazy goals and
//! the hierarchical data trees that tasks consume and produce.
//!
//! ## Layers
//!
//! - **Meta / Laminate**: immutable, structurally comparable configuration trees and their
//!   layered read-through view
//! - **Goal**: lazily started, memoized, cancellable async computations with declared
//!   dependencies and lifecycle listeners
//! - **Data / DataNode**: named lazy values arranged in an immutable tree addressed by dot
//!   paths, built and merged through [`DataNodeBuilder`]
//!
//! ## Key Types
//!
//! - [`Goal`]: one computation, run at most once
//! - [`Data`]: a named goal plus item meta
//! - [`DataNode`]: tree of data items, filterable and type-checkable
//! - [`ForgeError`]: error taxonomy shared with the task layer
//!
//! ## Example
//!
//! ```rust,no_run
//! use forge_core::{Data, DataNode, Goal, Meta};
//!
//! # async fn example() -> forge_core::ForgeResult<()> {
//! let mut builder = DataNode::builder("raw");
//! builder.put_static("run.x", 1_i64);
//! builder.put_data(
//!     "run.y",
//!     Data::new("y", Goal::lazy("y", async { Ok(2_i64) }), Meta::empty()),
//! );
//! let raw = builder.build();
//!
//! let y = raw.get_data("run.y")?.wait().await?;
//! assert_eq!(y, 2);
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod error;
pub mod filter;
pub mod goal;
pub mod laminate;
pub mod meta;
pub mod node;

pub use data::{Data, Dynamic};
pub use error::{ForgeError, ForgeResult, GoalError};
pub use filter::DataFilter;
pub use goal::{AnyGoal, Dispatcher, Goal, GoalListener, GoalState, Outcome};
pub use laminate::Laminate;
pub use meta::{Meta, MetaBuilder, Value};
pub use node::{ComputeReport, DataNode, DataNodeBuilder};
