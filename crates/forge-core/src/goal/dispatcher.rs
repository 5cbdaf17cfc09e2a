use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Execution context that goal bodies and listener notifications are spawned on.
///
/// A thin wrapper over a tokio runtime [`Handle`]. Blocking accessors such as
/// [`Goal::get`](super::Goal::get) drive futures through this handle, so the runtime should be
/// multi-threaded and the blocking call must not be made from inside one of its tasks.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    handle: Handle,
}

impl Dispatcher {
    /// Wrap an explicit runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Dispatcher for the runtime the caller is currently running in, if any.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Underlying runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a future on the runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Block the calling (non-runtime) thread on a future.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle.block_on(future)
    }
}

impl From<Handle> for Dispatcher {
    fn from(handle: Handle) -> Self {
        Self::new(handle)
    }
}
