//! Lifecycle stages of a call and their transitions.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use derive_more::{Display, From};
use futures::{
    future::{BoxFuture, FutureExt as _, Shared},
    stream::BoxStream,
};
use tandem_reactive::ObservableCell;

use crate::{
    coordinator::CoordinatorError,
    session::SessionError,
    utils::{Categorized, ErrorKind, Retryable, TaskScope},
};

use super::store::StoreClosed;

/// Application intent moving a call through its lifecycle.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Intent {
    Join,
    Accept,
    Reject,
}

impl Intent {
    /// [`Stage`] of this [`Intent`] being in progress.
    #[must_use]
    pub fn in_progress(self) -> Stage {
        match self {
            Self::Join => Stage::Joining,
            Self::Accept => Stage::Accepting,
            Self::Reject => Stage::Rejecting,
        }
    }

    /// [`Stage`] of this [`Intent`] being fulfilled.
    #[must_use]
    pub fn fulfilled(self) -> Stage {
        match self {
            Self::Join => Stage::Joined,
            Self::Accept => Stage::Accepted,
            Self::Reject => Stage::Rejected,
        }
    }
}

/// Errors of a call lifecycle transition.
///
/// Cloneable, since every waiter of a transition gets the same result.
#[derive(Clone, Debug, Display, From)]
pub enum CallError {
    /// Transition hasn't completed in time.
    #[display(fmt = "{} has timed out", _0)]
    #[from(ignore)]
    Timeout(Intent),

    /// Call has been left while the transition was in progress.
    #[display(fmt = "Call has been left")]
    #[from(ignore)]
    Cancelled,

    #[display(fmt = "{}", _0)]
    Coordinator(CoordinatorError),

    #[display(fmt = "{}", _0)]
    Session(SessionError),

    #[display(fmt = "{}", _0)]
    Store(StoreClosed),
}

impl Categorized for CallError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Unrecoverable,
            Self::Coordinator(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Store(e) => e.kind(),
        }
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Cancelled | Self::Store(_) => false,
            Self::Coordinator(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
        }
    }
}

/// Stage of a call lifecycle.
#[derive(Clone, Debug, Display)]
pub enum Stage {
    Idle,
    Joining,
    Joined,
    Accepting,
    Accepted,
    Rejecting,
    Rejected,

    /// Call has failed with the provided error.
    #[display(fmt = "Error: {}", _0)]
    Error(Arc<CallError>),
}

impl Stage {
    /// Indicates whether some [`Intent`] is in progress in this [`Stage`].
    #[inline]
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Joining | Self::Accepting | Self::Rejecting)
    }

    /// Error of this [`Stage`], if it's [`Stage::Error`].
    #[must_use]
    pub fn error(&self) -> Option<&CallError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl PartialEq for Stage {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Error(a), Self::Error(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

/// Input of the [`transition`] function.
#[derive(Clone, Debug)]
pub enum Transition {
    Started(Intent),
    Completed(Intent),
    Failed(Arc<CallError>),
    Left,
}

/// Computes the [`Stage`] following the provided one on the provided
/// [`Transition`].
///
/// An [`Intent`] may only start when no other one is in progress, and only
/// completes the [`Stage`] it has started. Leaving resets any [`Stage`].
#[must_use]
pub fn transition(stage: &Stage, event: Transition) -> Stage {
    match event {
        Transition::Left => Stage::Idle,
        Transition::Failed(e) => Stage::Error(e),
        Transition::Started(intent) if !stage.is_in_progress() => {
            intent.in_progress()
        }
        Transition::Completed(intent) if *stage == intent.in_progress() => {
            intent.fulfilled()
        }
        Transition::Started(_) | Transition::Completed(_) => stage.clone(),
    }
}

type Outcome = Result<(), CallError>;

/// Transition in progress, shared by all its waiters.
struct InFlight {
    intent: Intent,
    id: u64,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

struct Inner {
    stage: ObservableCell<Stage>,
    in_flight: Mutex<Option<InFlight>>,
    last_id: Mutex<u64>,
    scope: TaskScope,
}

/// Single-flight state machine of a call lifecycle.
///
/// Running an [`Intent`] which is already fulfilled resolves right away,
/// and running one which is in progress joins the running transition. An
/// [`Intent`] conflicting with the one in progress waits for its
/// completion.
#[derive(Clone)]
pub(crate) struct Lifecycle(Arc<Inner>);

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lifecycle").field(&self.stage()).finish()
    }
}

enum Pending {
    Own(Shared<BoxFuture<'static, Outcome>>),
    Other(Shared<BoxFuture<'static, Outcome>>),
}

impl Lifecycle {
    /// Creates a new [`Lifecycle`] in [`Stage::Idle`], running transitions
    /// in the provided [`TaskScope`].
    pub(crate) fn new(scope: TaskScope) -> Self {
        Self(Arc::new(Inner {
            stage: ObservableCell::new(Stage::Idle),
            in_flight: Mutex::new(None),
            last_id: Mutex::new(0),
            scope,
        }))
    }

    /// Current [`Stage`].
    pub(crate) fn stage(&self) -> Stage {
        self.0.stage.get()
    }

    /// Returns a stream of [`Stage`] changes, starting with the current one.
    pub(crate) fn on_stage_change(&self) -> BoxStream<'static, Stage> {
        self.0.stage.subscribe()
    }

    fn apply(&self, event: Transition) {
        let stage = &self.0.stage;
        let next = transition(&stage.get(), event);
        stage.set(next);
    }

    /// Runs the provided operation fulfilling the provided [`Intent`],
    /// unless it's fulfilled or in progress already.
    ///
    /// Failure of the operation moves the lifecycle to [`Stage::Error`].
    pub(crate) async fn run<F, Fut>(&self, intent: Intent, op: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut op = Some(op);
        loop {
            let pending = {
                let mut in_flight = lock(&self.0.in_flight);
                match in_flight.as_ref() {
                    Some(f) if f.intent == intent => {
                        Pending::Own(f.outcome.clone())
                    }
                    Some(f) => Pending::Other(f.outcome.clone()),
                    None => {
                        if self.stage() == intent.fulfilled() {
                            return Ok(());
                        }
                        let op = op.take().ok_or(CallError::Cancelled)?;
                        let started = self.start(intent, op());
                        let outcome = started.outcome.clone();
                        *in_flight = Some(started);
                        Pending::Own(outcome)
                    }
                }
            };
            match pending {
                Pending::Own(outcome) => return outcome.await,
                Pending::Other(outcome) => {
                    log::debug!("{} waits for the running transition", intent);
                    let _ = outcome.await;
                }
            }
        }
    }

    fn start<Fut>(&self, intent: Intent, op: Fut) -> InFlight
    where
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let id = {
            let mut last_id = lock(&self.0.last_id);
            *last_id += 1;
            *last_id
        };
        self.apply(Transition::Started(intent));

        let this = self.clone();
        let op = self.0.scope.wrap(async move {
            let res = op.await;
            this.complete(intent, id, &res);
            res
        });
        let outcome =
            async move { op.await.unwrap_or(Err(CallError::Cancelled)) }
                .boxed()
                .shared();
        drop(tokio::spawn(outcome.clone()));
        InFlight {
            intent,
            id,
            outcome,
        }
    }

    fn complete(&self, intent: Intent, id: u64, res: &Outcome) {
        {
            let mut in_flight = lock(&self.0.in_flight);
            if in_flight.as_ref().map_or(false, |f| f.id == id) {
                *in_flight = None;
            }
        }
        match res {
            Ok(()) => self.apply(Transition::Completed(intent)),
            Err(e) => {
                log::error!("{} failed: {}", intent, e);
                self.apply(Transition::Failed(Arc::new(e.clone())));
            }
        }
    }

    /// Moves the lifecycle to [`Stage::Error`] with the provided error.
    pub(crate) fn fail(&self, err: CallError) {
        self.apply(Transition::Failed(Arc::new(err)));
    }

    /// Resets the lifecycle to [`Stage::Idle`], dropping the transition in
    /// progress.
    pub(crate) fn reset(&self) {
        drop(lock(&self.0.in_flight).take());
        self.apply(Transition::Left);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
