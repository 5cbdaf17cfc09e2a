//! Integration tests for goal scheduling guarantees.
//!
//! These tests verify single execution under repeated and concurrent starts, dependency
//! ordering inside bodies, and cancellation of goals that never ran.

use forge_core::goal::{join_all, Dispatcher, Goal, GoalListener, GoalState};
use forge_core::GoalError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting_goal(id: &str, calls: &Arc<AtomicUsize>, value: i64) -> Goal<i64> {
    let calls = Arc::clone(calls);
    Goal::lazy(id, async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(value)
    })
}

/// Test that repeated run calls schedule the body once.
#[tokio::test(flavor = "multi_thread")]
async fn test_run_is_idempotent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let goal = counting_goal("counted", &calls, 1);

    for _ in 0..10 {
        goal.run();
    }
    assert_eq!(goal.wait().await.unwrap(), 1);
    goal.run();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that concurrent waiters share a single execution and its result.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_share_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let goal = counting_goal("shared", &calls, 99);

    let waiters: Vec<_> = (0..16)
        .map(|_| {
            let goal = goal.clone();
            tokio::spawn(async move { goal.wait().await })
        })
        .collect();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().unwrap(), 99);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that concurrent waiters of a failing goal all observe the same error.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_waiters_share_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let goal: Goal<i64> = Goal::lazy("fails", async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        anyhow::bail!("detector saturated")
    });

    let results = futures::future::join_all((0..8).map(|_| goal.wait())).await;
    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, GoalError::Failed { .. }));
        assert!(err.to_string().contains("detector saturated"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that a body awaiting two dependencies proceeds only after both are terminal.
#[tokio::test(flavor = "multi_thread")]
async fn test_body_waits_for_dependencies() {
    let fast = Goal::lazy("fast", async { Ok(1_i64) });
    let slow = Goal::lazy("slow", async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(2_i64)
    });

    let (d1, d2) = (fast.clone(), slow.clone());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    let sum = Goal::new(
        "sum",
        None,
        vec![fast.as_dependency(), slow.as_dependency()],
        async move {
            let a = d1.wait().await?;
            let b = d2.wait().await?;
            seen.lock().push((d1.state(), d2.state()));
            Ok(a + b)
        },
    );

    assert_eq!(sum.wait().await.unwrap(), 3);
    assert_eq!(
        *observed.lock(),
        vec![(GoalState::Completed, GoalState::Completed)]
    );
}

/// Test that starting a goal starts its declared dependencies.
#[tokio::test(flavor = "multi_thread")]
async fn test_run_starts_dependencies() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dep = counting_goal("dep", &calls, 5);
    let parent: Goal<()> = Goal::new("parent", None, vec![dep.as_dependency()], async { Ok(()) });

    parent.run();
    assert_ne!(dep.state(), GoalState::Pending);
    assert_eq!(dep.wait().await.unwrap(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Test that cancelling a pending goal never runs the body.
#[test]
fn test_cancel_pending_goal() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let goal = Goal::new(
        "never",
        Some(Dispatcher::new(runtime.handle().clone())),
        Vec::new(),
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1_i64)
        },
    );

    assert!(goal.cancel(false));
    let err = goal.get().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(goal.state(), GoalState::Cancelled);

    goal.run();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test that cancelling a goal leaves its dependencies and dependents alone.
#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_does_not_propagate() {
    let base = Goal::lazy("base", async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(10_i64)
    });
    let middle = base.map("middle", |v| Ok(v * 2));
    let top = base.map("top", |v| Ok(v + 1));

    middle.cancel(false);
    assert_eq!(top.wait().await.unwrap(), 11);
    assert_eq!(base.state(), GoalState::Completed);
    assert!(middle.wait().await.unwrap_err().is_cancelled());
}

/// Test that a blocking bounded wait fails alone while the goal completes.
#[test]
fn test_get_timeout_does_not_cancel() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let goal = Goal::new(
        "slow",
        Some(Dispatcher::new(runtime.handle().clone())),
        Vec::new(),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("done".to_string())
        },
    );

    let err = goal.get_timeout(Duration::from_millis(5)).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(goal.get().unwrap(), "done");
    assert_eq!(goal.get_timeout(Duration::from_millis(5)).unwrap(), "done");
}

/// Test that listeners see start and completion in registration order.
#[tokio::test(flavor = "multi_thread")]
async fn test_listener_events_in_order() {
    struct Recorder {
        tag: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl GoalListener<i64> for Recorder {
        fn on_start(&self, goal: &str) -> anyhow::Result<()> {
            self.events.lock().push(format!("{}:start:{}", self.tag, goal));
            Ok(())
        }

        fn on_complete(&self, goal: &str, value: &i64) -> anyhow::Result<()> {
            self.events
                .lock()
                .push(format!("{}:complete:{}={}", self.tag, goal, value));
            Ok(())
        }
    }

    let events = Arc::new(Mutex::new(Vec::new()));
    let goal = Goal::lazy("observed", async { Ok(4_i64) });
    for tag in ["first", "second"] {
        goal.register_listener(Arc::new(Recorder {
            tag,
            events: Arc::clone(&events),
        }));
    }
    goal.wait().await.unwrap();

    let expected = vec![
        "first:start:observed",
        "second:start:observed",
        "first:complete:observed=4",
        "second:complete:observed=4",
    ];
    for _ in 0..100 {
        if events.lock().len() == expected.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(*events.lock(), expected);
}

/// Test that a joined goal fails when any input fails.
#[tokio::test(flavor = "multi_thread")]
async fn test_join_all_fails_on_input_failure() {
    let goals = vec![
        Goal::ready("a", 1_i64),
        Goal::failed("b", anyhow::anyhow!("no signal")),
    ];
    let joined = join_all("ab", goals, |values: Vec<i64>| Ok(values.len()));
    let err = joined.wait().await.unwrap_err();
    assert!(format!("{}", err).contains("no signal"));
}
