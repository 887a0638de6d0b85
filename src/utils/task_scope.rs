//! Cancellation of the spawned tasks.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use derive_more::{Display, From};
use futures::future::{self, AbortHandle, Abortable};

/// Wrapper around [`AbortHandle`] which aborts [`Future`] on [`Drop`].
#[derive(Debug, From)]
pub struct TaskHandle(AbortHandle);

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Error of a [`Future`] aborted by its [`TaskScope`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Task has been cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    handles: Mutex<Vec<AbortHandle>>,
}

/// Single cancellation scope of all the tasks tied to some call.
///
/// Cloned [`TaskScope`]s share the same scope. Tasks are cancelled on
/// [`TaskScope::cancel`] only, dropping the scope doesn't affect them.
#[derive(Clone, Debug, Default)]
pub struct TaskScope(Arc<Inner>);

impl TaskScope {
    /// Creates a new empty [`TaskScope`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the provided [`Future`] on the [`tokio`] runtime, aborting it
    /// once this [`TaskScope`] is cancelled.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let fut = self.wrap(fut);
        drop(tokio::spawn(async move {
            let _ = fut.await;
        }));
    }

    /// Wraps the provided [`Future`] to be aborted once this [`TaskScope`]
    /// is cancelled, resolving with [`Cancelled`] in that case.
    pub fn wrap<F>(
        &self,
        fut: F,
    ) -> impl Future<Output = Result<F::Output, Cancelled>>
    where
        F: Future,
    {
        let (handle, reg) = AbortHandle::new_pair();
        if self.is_cancelled() {
            handle.abort();
        } else {
            lock(&self.0.handles).push(handle);
        }
        let fut = Abortable::new(fut, reg);
        async move { fut.await.map_err(|_| Cancelled) }
    }

    /// Cancels all the tasks of this [`TaskScope`], and all the tasks
    /// spawned in it afterwards.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        for handle in lock(&self.0.handles).drain(..) {
            handle.abort();
        }
    }

    /// Indicates whether this [`TaskScope`] has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a [`Future`] resolving once this [`TaskScope`] is cancelled.
    pub fn cancelled(&self) -> impl Future<Output = ()> {
        let fut = self.wrap(future::pending::<()>());
        async move {
            let _ = fut.await;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
