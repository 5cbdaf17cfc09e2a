//! Named, typed lazy values.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::error::{ForgeError, ForgeResult};
use crate::goal::{Goal, Outcome};
use crate::meta::Meta;

/// Type-erased payload used by heterogeneous trees.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// A named lazy value with item metadata.
///
/// The declared element type is recorded at construction and survives [`Data::erase`], so a
/// dynamically typed tree can still be checked without computing anything.
pub struct Data<T> {
    name: String,
    goal: Goal<T>,
    meta: Meta,
    type_id: TypeId,
    type_name: &'static str,
}

impl<T> Clone for Data<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            goal: self.goal.clone(),
            meta: self.meta.clone(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Data<T> {
    /// Wrap a goal.
    pub fn new(name: impl Into<String>, goal: Goal<T>, meta: Meta) -> Self {
        Self {
            name: name.into(),
            goal,
            meta,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Wrap an already known value.
    pub fn ready(name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        let goal = Goal::ready(name.clone(), value);
        Self::new(name, goal, Meta::empty())
    }

    /// Replace the item meta.
    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Item name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Item meta.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Backing goal. Does not start it.
    pub fn goal(&self) -> &Goal<T> {
        &self.goal
    }

    /// Declared element type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// True when the declared element type is `R`.
    pub fn is<R: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<R>()
    }

    /// Compute (or reuse) the value.
    pub async fn wait(&self) -> Outcome<T> {
        self.goal.wait().await
    }

    /// Blocking accessor, see [`Goal::get`].
    pub fn get(&self) -> Outcome<T> {
        self.goal.get()
    }

    /// Convert to the dynamic element type, keeping the declared type.
    pub fn erase(&self) -> Data<Dynamic> {
        let goal = match self.goal.peek() {
            Some(outcome) => Goal::resolved(
                self.goal.id(),
                outcome.map(|value| Arc::new(value) as Dynamic),
            ),
            None => self
                .goal
                .forward(self.goal.id(), |value| Ok(Arc::new(value) as Dynamic)),
        };
        Data {
            name: self.name.clone(),
            goal,
            meta: self.meta.clone(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

impl Data<Dynamic> {
    /// Recover the concrete element type of an erased item.
    ///
    /// Fails with [`ForgeError::TypeMismatch`] if the declared type is not `R`.
    pub fn downcast<R: Clone + Send + Sync + 'static>(&self) -> ForgeResult<Data<R>> {
        if !self.is::<R>() {
            return Err(ForgeError::TypeMismatch {
                path: self.name.clone(),
                expected: type_name::<R>(),
                actual: self.type_name,
            });
        }
        let expected = type_name::<R>();
        let cast = move |value: Dynamic| {
            value
                .downcast_ref::<R>()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("value is not a {}", expected))
        };
        let goal = match self.goal.peek() {
            Some(Err(error)) => Goal::resolved(self.goal.id(), Err(error)),
            _ => self.goal.forward(self.goal.id(), cast),
        };
        Ok(Data::new(self.name.clone(), goal, self.meta.clone()))
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Data<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("state", &self.goal.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::GoalState;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_erase_and_downcast() {
        let data = Data::ready("x", 5_i64);
        let erased = data.erase();
        assert!(erased.is::<i64>());
        assert_eq!(erased.type_name(), "i64");

        let back = erased.downcast::<i64>().unwrap();
        assert_eq!(back.wait().await.unwrap(), 5);

        let err = erased.downcast::<String>().unwrap_err();
        assert!(matches!(err, ForgeError::TypeMismatch { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancellation_survives_erase_and_downcast() {
        let data = Data::new("item", Goal::lazy("item", async { Ok(1_i64) }), Meta::empty());
        let erased_early = data.erase();
        assert!(data.goal().cancel(false));

        let err = erased_early.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(erased_early.goal().state(), GoalState::Cancelled);

        let back = erased_early.downcast::<i64>().unwrap();
        assert!(back.wait().await.unwrap_err().is_cancelled());

        let erased_late = data.erase();
        assert_eq!(erased_late.goal().state(), GoalState::Cancelled);
        let back = erased_late.downcast::<i64>().unwrap();
        assert!(back.wait().await.unwrap_err().is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lazy_erase_keeps_laziness() {
        let goal = Goal::lazy("y", async { Ok(2.5_f64) });
        let data = Data::new("y", goal, Meta::builder("y").set("unit", "V").build());
        let erased = data.erase();
        assert!(!data.goal().is_done());

        let value = erased.wait().await.unwrap();
        assert_eq!(value.downcast_ref::<f64>(), Some(&2.5));
        assert_eq!(erased.meta().get_str("unit"), Some("V"));
    }
}
