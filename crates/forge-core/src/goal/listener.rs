use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::Dispatcher;
use crate::error::GoalError;

/// Observer of a goal's lifecycle.
///
/// Callbacks run on the goal's dispatcher, never on the thread that completed the goal, and
/// are delivered in registration order. Returned errors and panics are logged and dropped;
/// they never affect the goal or other listeners.
pub trait GoalListener<T>: Send + Sync {
    /// The goal body was started.
    fn on_start(&self, _goal: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// The goal produced a value.
    fn on_complete(&self, _goal: &str, _value: &T) -> anyhow::Result<()> {
        Ok(())
    }

    /// The goal failed or was cancelled.
    fn on_failed(&self, _goal: &str, _error: &GoalError) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) enum GoalEvent<T> {
    Started,
    Completed(T),
    Failed(GoalError),
}

pub(crate) struct Delivery<T> {
    goal: Arc<str>,
    event: GoalEvent<T>,
    targets: Vec<Arc<dyn GoalListener<T>>>,
}

impl<T> Delivery<T> {
    fn dispatch(self) {
        for listener in &self.targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| match &self.event {
                GoalEvent::Started => listener.on_start(&self.goal),
                GoalEvent::Completed(value) => listener.on_complete(&self.goal, value),
                GoalEvent::Failed(error) => listener.on_failed(&self.goal, error),
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(goal = %self.goal, error = %e, "Goal listener failed"),
                Err(_) => warn!(goal = %self.goal, "Goal listener panicked"),
            }
        }
    }
}

/// Registered listeners plus the ordered delivery queue feeding them.
pub(crate) struct Listeners<T> {
    listeners: Vec<Arc<dyn GoalListener<T>>>,
    queue: Option<mpsc::UnboundedSender<Delivery<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            queue: None,
        }
    }
}

impl<T: Send + Sync + 'static> Listeners<T> {
    /// Add a listener, starting the delivery queue on first use.
    pub(crate) fn register(
        &mut self,
        listener: Arc<dyn GoalListener<T>>,
        dispatcher: Option<&Dispatcher>,
    ) {
        if self.queue.is_none() {
            let dispatcher = dispatcher.cloned().or_else(Dispatcher::try_current);
            if let Some(dispatcher) = dispatcher {
                let (tx, mut rx) = mpsc::unbounded_channel::<Delivery<T>>();
                dispatcher.spawn(async move {
                    while let Some(delivery) = rx.recv().await {
                        delivery.dispatch();
                    }
                });
                self.queue = Some(tx);
            }
        }
        self.listeners.push(listener);
    }

    /// Prepare an event for every registered listener.
    ///
    /// Returns the delivery when no queue is available; the caller must run it with
    /// [`run_inline`] after releasing its locks.
    pub(crate) fn notify(&self, goal: &Arc<str>, event: GoalEvent<T>) -> Option<Delivery<T>> {
        if self.listeners.is_empty() {
            return None;
        }
        self.enqueue(Delivery {
            goal: Arc::clone(goal),
            event,
            targets: self.listeners.clone(),
        })
    }

    /// Prepare an event for the most recently registered listener only.
    pub(crate) fn replay_last(&self, goal: &Arc<str>, event: GoalEvent<T>) -> Option<Delivery<T>> {
        let last = self.listeners.last()?;
        self.enqueue(Delivery {
            goal: Arc::clone(goal),
            event,
            targets: vec![Arc::clone(last)],
        })
    }

    fn enqueue(&self, delivery: Delivery<T>) -> Option<Delivery<T>> {
        match &self.queue {
            Some(tx) => tx.send(delivery).err().map(|e| e.0),
            None => Some(delivery),
        }
    }
}

/// Deliver synchronously when no runtime is available to host the queue.
pub(crate) fn run_inline<T>(delivery: Option<Delivery<T>>) {
    if let Some(delivery) = delivery {
        delivery.dispatch();
    }
}
