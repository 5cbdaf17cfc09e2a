use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use super::{AnyGoal, Forwarded, Goal};

impl<T: Clone + Send + Sync + 'static> Goal<T> {
    /// Derive a goal that transforms this goal's value.
    ///
    /// The new goal declares `self` as its only dependency and shares its dispatcher.
    pub fn map<R, F>(&self, id: impl Into<String>, f: F) -> Goal<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> anyhow::Result<R> + Send + 'static,
    {
        let source = self.clone();
        Goal::new(id, self.dispatcher(), vec![self.as_dependency()], async move {
            let value = source.wait().await?;
            f(value)
        })
    }

    /// Like [`Goal::map`], but a failure or cancellation of `self` is stored unchanged in the
    /// new goal instead of being wrapped as its own failure.
    pub fn forward<R, F>(&self, id: impl Into<String>, f: F) -> Goal<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> anyhow::Result<R> + Send + 'static,
    {
        let source = self.clone();
        Goal::new(id, self.dispatcher(), vec![self.as_dependency()], async move {
            let value = source.wait().await.map_err(Forwarded)?;
            f(value)
        })
    }

    /// Like [`Goal::map`] with an asynchronous transform.
    pub fn pipe<R, F, Fut>(&self, id: impl Into<String>, f: F) -> Goal<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let source = self.clone();
        Goal::new(id, self.dispatcher(), vec![self.as_dependency()], async move {
            let value = source.wait().await?;
            f(value).await
        })
    }
}

/// Wait for every goal of a list, then combine their values in list order.
///
/// The first failure among the inputs fails the joined goal.
pub fn join_all<T, R, F>(id: impl Into<String>, goals: Vec<Goal<T>>, combine: F) -> Goal<R>
where
    T: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(Vec<T>) -> anyhow::Result<R> + Send + 'static,
{
    let dispatcher = goals.iter().find_map(Goal::dispatcher);
    let dependencies = goals.iter().map(Goal::as_dependency).collect();
    Goal::new(id, dispatcher, dependencies, async move {
        let outcomes = futures::future::join_all(goals.iter().map(Goal::wait)).await;
        let values = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
        combine(values)
    })
}

/// Wait for every goal of a name-keyed map, then combine the values by name.
pub fn join_map<T, R, F>(
    id: impl Into<String>,
    goals: BTreeMap<String, Goal<T>>,
    combine: F,
) -> Goal<R>
where
    T: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
    F: FnOnce(BTreeMap<String, T>) -> anyhow::Result<R> + Send + 'static,
{
    let dispatcher = goals.values().find_map(Goal::dispatcher);
    let dependencies = goals.values().map(Goal::as_dependency).collect();
    Goal::new(id, dispatcher, dependencies, async move {
        let mut values = BTreeMap::new();
        for (name, goal) in goals {
            values.insert(name, goal.wait().await?);
        }
        combine(values)
    })
}

/// Bundle goals without combining their values.
///
/// The group completes once every member is terminal, whatever their individual outcome.
pub fn group(id: impl Into<String>, goals: Vec<Arc<dyn AnyGoal>>) -> Goal<()> {
    let members = goals.clone();
    Goal::new(id, None, goals, async move {
        futures::future::join_all(members.iter().map(|goal| goal.finished())).await;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::GoalState;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_map_and_pipe() {
        let base = Goal::ready("base", 20);
        let doubled = base.map("doubled", |v| Ok(v * 2));
        let text = doubled.pipe("text", |v| async move { Ok(format!("value={}", v)) });

        assert_eq!(text.wait().await.unwrap(), "value=40");
        assert_eq!(doubled.state(), GoalState::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_map_propagates_failure() {
        let base: Goal<i32> = Goal::failed("base", anyhow::anyhow!("no data"));
        let mapped = base.map("mapped", |v| Ok(v + 1));
        let err = mapped.wait().await.unwrap_err();
        assert_eq!(err.goal(), "mapped");
        assert!(format!("{:#}", err).contains("base"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_forward_keeps_source_error() {
        let base: Goal<i32> = Goal::lazy("base", async { Ok(1) });
        let forwarded = base.forward("forwarded", |v| Ok(v + 1));
        assert!(base.cancel(false));
        let err = forwarded.wait().await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.goal(), "base");
        assert_eq!(forwarded.state(), GoalState::Cancelled);

        let failing: Goal<i32> = Goal::failed("failing", anyhow::anyhow!("no data"));
        let err = failing.forward("next", |v| Ok(v)).wait().await.unwrap_err();
        assert_eq!(err.goal(), "failing");

        let own = Goal::ready("ok", 1).forward("own", |_| -> anyhow::Result<i32> {
            anyhow::bail!("own failure")
        });
        assert_eq!(own.wait().await.unwrap_err().goal(), "own");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_all_keeps_order() {
        let goals = (1..=4)
            .map(|i| Goal::lazy(format!("g{}", i), async move { Ok(i) }))
            .collect();
        let sum = join_all("sum", goals, |values: Vec<i32>| {
            assert_eq!(values, vec![1, 2, 3, 4]);
            Ok(values.iter().sum::<i32>())
        });
        assert_eq!(sum.wait().await.unwrap(), 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_join_map() {
        let mut goals = BTreeMap::new();
        goals.insert("x".to_string(), Goal::ready("x", 1));
        goals.insert("y".to_string(), Goal::ready("y", 2));
        let joined = join_map("xy", goals, |values| {
            Ok(values
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","))
        });
        assert_eq!(joined.wait().await.unwrap(), "x=1,y=2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_tolerates_failures() {
        let ok = Goal::ready("ok", 1);
        let bad: Goal<i32> = Goal::failed("bad", anyhow::anyhow!("nope"));
        let all = group("all", vec![ok.as_dependency(), bad.as_dependency()]);

        all.wait().await.unwrap();
        assert_eq!(bad.state(), GoalState::Failed);
    }
}
