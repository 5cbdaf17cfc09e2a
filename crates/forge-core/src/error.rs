//! Error types shared by the goal engine, the data tree and the task layer.
//!
//! Two levels are kept apart:
//!
//! - [`GoalError`] is what a single [`Goal`](crate::goal::Goal) resolves to when it does not
//!   produce a value. It is `Clone` because one memoized outcome is observed by every waiter.
//! - [`ForgeError`] is the crate-wide error returned by synchronous operations (lookups,
//!   validation, type assertions) and wraps `GoalError` when a computed value is requested.
//!
//! Validation and lookup failures are raised before anything is scheduled. Computation
//! failures stay inside the owning goal and only surface when that goal is awaited.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the forge error type.
pub type ForgeResult<T> = std::result::Result<T, ForgeError>;

/// Terminal error of a goal, or of a bounded wait on it.
#[derive(Error, Debug, Clone)]
pub enum GoalError {
    /// The goal body returned an error or panicked.
    #[error("Goal '{goal}' failed: {cause}")]
    Failed {
        /// Id of the failing goal
        goal: String,
        /// Error produced by the body
        cause: Arc<anyhow::Error>,
    },

    /// The goal was cancelled before it produced a value.
    #[error("Goal '{goal}' was cancelled")]
    Cancelled {
        /// Id of the cancelled goal
        goal: String,
    },

    /// A bounded wait expired. The goal itself keeps running.
    #[error("Timed out after {after:?} waiting for goal '{goal}'")]
    Timeout {
        /// Id of the awaited goal
        goal: String,
        /// Wait duration that expired
        after: Duration,
    },
}

impl GoalError {
    /// Wrap a body error for the given goal.
    pub fn failed(goal: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        GoalError::Failed {
            goal: goal.into(),
            cause: Arc::new(err.into()),
        }
    }

    /// Id of the goal this error belongs to.
    pub fn goal(&self) -> &str {
        match self {
            GoalError::Failed { goal, .. }
            | GoalError::Cancelled { goal }
            | GoalError::Timeout { goal, .. } => goal,
        }
    }

    /// Returns true for [`GoalError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GoalError::Cancelled { .. })
    }

    /// Returns true for [`GoalError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, GoalError::Timeout { .. })
    }
}

/// Primary error type of the forge framework.
///
/// # Error Categories
///
/// 1. **Pre-scheduling errors** - `Validation`, `NotFound`, `TypeMismatch`
///    - Raised synchronously while a task model or data tree is being assembled
///    - Nothing has been scheduled when they are returned
///
/// 2. **Computation errors** - `Goal`
///    - Raised only when a specific lazy value is awaited
///    - Sibling items of the same tree are unaffected
///
/// 3. **Environment errors** - `Io`, `Configuration`
///    - Raised while loading workspace descriptions or settings
#[derive(Error, Debug)]
pub enum ForgeError {
    /// A task model failed its precondition checks.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A task, target or data item could not be resolved by name.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// What was looked up (task, target, data, node)
        kind: &'static str,
        /// The exact name that was requested
        name: String,
    },

    /// A data item does not hold the asserted element type.
    #[error("Type mismatch at '{path}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Dot path of the offending item
        path: String,
        /// Asserted type
        expected: &'static str,
        /// Declared type of the item
        actual: &'static str,
    },

    /// A goal resolved to an error.
    #[error(transparent)]
    Goal(#[from] GoalError),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration source could not be interpreted.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ForgeError {
    /// Shorthand for [`ForgeError::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ForgeError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for [`ForgeError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        ForgeError::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_error_accessors() {
        let err = GoalError::failed("sum", anyhow::anyhow!("boom"));
        assert_eq!(err.goal(), "sum");
        assert!(!err.is_cancelled());
        assert!(err.to_string().contains("boom"));

        let cancelled = GoalError::Cancelled {
            goal: "sum".to_string(),
        };
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_forge_error_display() {
        let err = ForgeError::not_found("task", "fit");
        assert_eq!(err.to_string(), "task 'fit' not found");

        let err = ForgeError::TypeMismatch {
            path: "a.b".to_string(),
            expected: "f64",
            actual: "alloc::string::String",
        };
        assert!(err.to_string().contains("a.b"));
    }
}
