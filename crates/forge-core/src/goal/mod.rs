//! Lazy, memoized, cancellable asynchronous computations.
//!
//! A [`Goal`] wraps an async body together with the goals it depends on. Nothing runs until
//! [`Goal::run`] (or any waiting accessor) is called. The body executes at most once and its
//! outcome is stored, so every waiter observes the same value or error.
//!
//! # Lifecycle
//!
//! ```text
//! Pending -> Starting (dependencies started) -> Running -> Completed | Failed | Cancelled
//! ```
//!
//! Terminal states never change. Starting a goal starts its dependencies, but does not wait
//! for them: the body awaits whatever it actually needs.
//!
//! # Example
//!
//! ```rust,no_run
//! use forge_core::goal::Goal;
//!
//! # async fn demo() {
//! let a = Goal::ready("a", 1);
//! let b = a.map("b", |v| Ok(v + 1));
//! assert_eq!(b.wait().await.unwrap(), 2);
//! # }
//! ```

mod combinators;
mod dispatcher;
mod listener;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::GoalError;

pub use combinators::{group, join_all, join_map};
pub use dispatcher::Dispatcher;
pub use listener::GoalListener;

use listener::{run_inline, GoalEvent, Listeners};

/// Memoized result of a goal.
pub type Outcome<T> = Result<T, GoalError>;

/// Upstream goal error carried through a body so it is stored unchanged.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub(crate) struct Forwarded(pub(crate) GoalError);

fn body_error(goal: &str, error: anyhow::Error) -> GoalError {
    match error.downcast::<Forwarded>() {
        Ok(Forwarded(inner)) => inner,
        Err(error) => GoalError::failed(goal, error),
    }
}

type Body<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Observable state of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalState {
    /// Not started yet
    Pending,
    /// Dependencies are being started
    Starting,
    /// Body is executing
    Running,
    /// Produced a value
    Completed,
    /// Body returned an error or panicked
    Failed,
    /// Cancelled before producing a value
    Cancelled,
}

impl GoalState {
    /// True for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalState::Completed | GoalState::Failed | GoalState::Cancelled
        )
    }
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalState::Pending => write!(f, "Pending"),
            GoalState::Starting => write!(f, "Starting"),
            GoalState::Running => write!(f, "Running"),
            GoalState::Completed => write!(f, "Completed"),
            GoalState::Failed => write!(f, "Failed"),
            GoalState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

enum Phase<T> {
    Pending,
    Starting,
    Running,
    Done(Outcome<T>),
}

impl<T: Clone> Phase<T> {
    fn state(&self) -> GoalState {
        match self {
            Phase::Pending => GoalState::Pending,
            Phase::Starting => GoalState::Starting,
            Phase::Running => GoalState::Running,
            Phase::Done(Ok(_)) => GoalState::Completed,
            Phase::Done(Err(e)) if e.is_cancelled() => GoalState::Cancelled,
            Phase::Done(Err(_)) => GoalState::Failed,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done(_))
    }

    fn outcome(&self) -> Option<Outcome<T>> {
        match self {
            Phase::Done(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    fn terminal_event(&self) -> Option<GoalEvent<T>> {
        match self {
            Phase::Done(Ok(value)) => Some(GoalEvent::Completed(value.clone())),
            Phase::Done(Err(error)) => Some(GoalEvent::Failed(error.clone())),
            _ => None,
        }
    }
}

/// Type-erased view of a goal, used for heterogeneous dependency lists.
pub trait AnyGoal: Send + Sync {
    /// Goal id.
    fn id(&self) -> &str;

    /// Current state.
    fn state(&self) -> GoalState;

    /// Start the goal if it is not started yet.
    fn run(&self);

    /// Cancel the goal. Returns false if it was already terminal.
    fn cancel(&self, force: bool) -> bool;

    /// Resolves once the goal is terminal, yielding its final state.
    fn finished(&self) -> BoxFuture<'static, GoalState>;
}

struct Shared<T> {
    id: Arc<str>,
    dependencies: Vec<Arc<dyn AnyGoal>>,
    dispatcher: OnceLock<Dispatcher>,
    body: Mutex<Option<Body<T>>>,
    phase: watch::Sender<Phase<T>>,
    listeners: Mutex<Listeners<T>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a lazily started, memoized asynchronous computation.
///
/// Cloning is cheap and yields another handle to the same computation.
pub struct Goal<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Goal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Goal<T> {
    /// Create a pending goal.
    ///
    /// `dispatcher` is the runtime the body is spawned on. When `None`, the runtime current at
    /// the time of [`Goal::run`] is used.
    pub fn new<F>(
        id: impl Into<String>,
        dispatcher: Option<Dispatcher>,
        dependencies: Vec<Arc<dyn AnyGoal>>,
        body: F,
    ) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let slot = OnceLock::new();
        if let Some(dispatcher) = dispatcher {
            let _ = slot.set(dispatcher);
        }
        Self::from_parts(id.into(), slot, dependencies, Some(body.boxed()), Phase::Pending)
    }

    /// Pending goal without dependencies on the ambient runtime.
    pub fn lazy<F>(id: impl Into<String>, body: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(id, None, Vec::new(), body)
    }

    /// Goal that is already completed with `value`.
    pub fn ready(id: impl Into<String>, value: T) -> Self {
        Self::from_parts(id.into(), OnceLock::new(), Vec::new(), None, Phase::Done(Ok(value)))
    }

    /// Goal that is already finished with `outcome`. The error, if any, is kept as is.
    pub fn resolved(id: impl Into<String>, outcome: Outcome<T>) -> Self {
        Self::from_parts(id.into(), OnceLock::new(), Vec::new(), None, Phase::Done(outcome))
    }

    /// Goal that has already failed with `error`.
    pub fn failed(id: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        let id = id.into();
        let error = GoalError::failed(id.clone(), error);
        Self::from_parts(id, OnceLock::new(), Vec::new(), None, Phase::Done(Err(error)))
    }

    fn from_parts(
        id: String,
        dispatcher: OnceLock<Dispatcher>,
        dependencies: Vec<Arc<dyn AnyGoal>>,
        body: Option<Body<T>>,
        phase: Phase<T>,
    ) -> Self {
        let (phase, _) = watch::channel(phase);
        Self {
            shared: Arc::new(Shared {
                id: Arc::from(id),
                dependencies,
                dispatcher,
                body: Mutex::new(body),
                phase,
                listeners: Mutex::new(Listeners::default()),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    /// Goal id.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current state.
    pub fn state(&self) -> GoalState {
        self.shared.phase.borrow().state()
    }

    /// True once the goal reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.shared.phase.borrow().is_terminal()
    }

    /// Stored outcome, without starting or waiting.
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.shared.phase.borrow().outcome()
    }

    /// Declared upstream goals.
    pub fn dependencies(&self) -> &[Arc<dyn AnyGoal>] {
        &self.shared.dependencies
    }

    /// Dispatcher assigned at construction or resolved at start.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.shared.dispatcher.get().cloned()
    }

    /// Type-erased handle for use as a dependency.
    pub fn as_dependency(&self) -> Arc<dyn AnyGoal> {
        Arc::new(self.clone())
    }

    /// Start dependencies, then the body. Calling this more than once has no further effect.
    pub fn run(&self) {
        let shared = &self.shared;
        let claimed = shared.phase.send_if_modified(|phase| {
            if matches!(phase, Phase::Pending) {
                *phase = Phase::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return;
        }

        trace!(goal = %shared.id, dependencies = shared.dependencies.len(), "Starting goal dependencies");
        for dependency in &shared.dependencies {
            dependency.run();
        }

        let dispatcher = match shared.dispatcher.get() {
            Some(dispatcher) => dispatcher.clone(),
            None => match Dispatcher::try_current() {
                Some(current) => shared.dispatcher.get_or_init(|| current).clone(),
                None => {
                    shared.body.lock().take();
                    self.complete(Err(GoalError::failed(
                        self.id(),
                        anyhow::anyhow!("no async runtime available to run goal"),
                    )));
                    return;
                }
            },
        };

        // Cancelled while dependencies were starting.
        let Some(body) = shared.body.lock().take() else {
            return;
        };

        let started = {
            let listeners = shared.listeners.lock();
            let running = shared.phase.send_if_modified(|phase| {
                if matches!(phase, Phase::Starting) {
                    *phase = Phase::Running;
                    true
                } else {
                    false
                }
            });
            if !running {
                return;
            }
            listeners.notify(&shared.id, GoalEvent::Started)
        };
        run_inline(started);
        debug!(goal = %shared.id, "Goal started");

        let goal = self.clone();
        let token = shared.cancel.clone();
        let handle = dispatcher.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = AssertUnwindSafe(body).catch_unwind() => match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(body_error(goal.id(), e)),
                    Err(panic) => Err(GoalError::failed(
                        goal.id(),
                        anyhow::anyhow!("goal body panicked: {}", panic_message(panic.as_ref())),
                    )),
                },
            };
            goal.complete(outcome);
        });
        *shared.task.lock() = Some(handle);
    }

    fn complete(&self, outcome: Outcome<T>) {
        let shared = &self.shared;
        let (event, failure) = match &outcome {
            Ok(value) => (GoalEvent::Completed(value.clone()), None),
            Err(error) => (GoalEvent::Failed(error.clone()), Some(error.to_string())),
        };
        let delivery = {
            let listeners = shared.listeners.lock();
            let stored = shared.phase.send_if_modified(|phase| {
                if phase.is_terminal() {
                    false
                } else {
                    *phase = Phase::Done(outcome);
                    true
                }
            });
            if !stored {
                return;
            }
            listeners.notify(&shared.id, event)
        };
        run_inline(delivery);
        match failure {
            None => debug!(goal = %shared.id, "Goal completed"),
            Some(error) => warn!(goal = %shared.id, %error, "Goal failed"),
        }
    }

    /// Cancel the goal.
    ///
    /// A pending goal becomes `Cancelled` without its body ever running. A running body is
    /// dropped at its next suspension point; with `force` the spawned task is also aborted.
    /// Dependencies and dependents are not affected. Returns false if the goal was already
    /// terminal.
    pub fn cancel(&self, force: bool) -> bool {
        let shared = &self.shared;
        let error = GoalError::Cancelled {
            goal: shared.id.to_string(),
        };
        let delivery = {
            let listeners = shared.listeners.lock();
            let cancelled = shared.phase.send_if_modified(|phase| {
                if phase.is_terminal() {
                    false
                } else {
                    *phase = Phase::Done(Err(error.clone()));
                    true
                }
            });
            if !cancelled {
                return false;
            }
            listeners.notify(&shared.id, GoalEvent::Failed(error))
        };
        shared.body.lock().take();
        shared.cancel.cancel();
        if force {
            if let Some(task) = shared.task.lock().take() {
                task.abort();
            }
        }
        run_inline(delivery);
        debug!(goal = %shared.id, force, "Goal cancelled");
        true
    }

    /// Start the goal and wait for its outcome.
    pub async fn wait(&self) -> Outcome<T> {
        self.run();
        let mut phase = self.shared.phase.subscribe();
        let outcome = match phase.wait_for(Phase::is_terminal).await {
            Ok(done) => done.outcome(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(GoalError::Cancelled {
                goal: self.id().to_string(),
            })
        })
    }

    /// Wait for at most `timeout`. Expiry fails only this call; the goal keeps running.
    pub async fn wait_timeout(&self, timeout: Duration) -> Outcome<T> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GoalError::Timeout {
                goal: self.id().to_string(),
                after: timeout,
            }),
        }
    }

    /// Blocking variant of [`Goal::wait`].
    ///
    /// Must not be called from inside an async task of the goal's runtime.
    pub fn get(&self) -> Outcome<T> {
        if let Some(outcome) = self.peek() {
            return outcome;
        }
        self.run();
        match self.dispatcher() {
            Some(dispatcher) => dispatcher.block_on(self.wait()),
            None => futures::executor::block_on(self.wait()),
        }
    }

    /// Blocking variant of [`Goal::wait_timeout`].
    pub fn get_timeout(&self, timeout: Duration) -> Outcome<T> {
        if let Some(outcome) = self.peek() {
            return outcome;
        }
        self.run();
        match self.dispatcher() {
            Some(dispatcher) => dispatcher.block_on(self.wait_timeout(timeout)),
            None => match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime.block_on(self.wait_timeout(timeout)),
                Err(e) => Err(GoalError::failed(self.id(), e)),
            },
        }
    }

    /// Register a lifecycle listener.
    ///
    /// A listener added after the goal finished receives the terminal event immediately.
    pub fn register_listener(&self, listener: Arc<dyn GoalListener<T>>) {
        let shared = &self.shared;
        let delivery = {
            let mut listeners = shared.listeners.lock();
            listeners.register(listener, shared.dispatcher.get());
            let replay = shared.phase.borrow().terminal_event();
            replay.and_then(|event| listeners.replay_last(&shared.id, event))
        };
        run_inline(delivery);
    }
}

impl<T: Clone + Send + Sync + 'static> AnyGoal for Goal<T> {
    fn id(&self) -> &str {
        Goal::id(self)
    }

    fn state(&self) -> GoalState {
        Goal::state(self)
    }

    fn run(&self) {
        Goal::run(self)
    }

    fn cancel(&self, force: bool) -> bool {
        Goal::cancel(self, force)
    }

    fn finished(&self) -> BoxFuture<'static, GoalState> {
        let goal = self.clone();
        async move {
            let _ = goal.wait().await;
            goal.state()
        }
        .boxed()
    }
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for Goal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Goal")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
