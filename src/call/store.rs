//! Serialized owner of a [`CallState`].

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use derive_more::Display;
use futures::{
    channel::{mpsc, oneshot},
    future,
    stream::{BoxStream, StreamExt as _},
};
use tandem_reactive::ObservableCell;
use tandem_sfu_proto::SfuEvent;

use crate::utils::{Categorized, ErrorKind, TaskHandle};

use super::{
    reducer::{self, ParticipantEvent},
    state::CallState,
};

/// Error of accessing a closed [`CallStore`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Call store is closed")]
pub struct StoreClosed;

impl Categorized for StoreClosed {
    #[inline]
    fn kind(&self) -> ErrorKind {
        ErrorKind::Unrecoverable
    }
}

/// Versioned snapshot of a [`CallState`].
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Number of the mutations applied so far.
    pub version: u64,
    pub state: Arc<CallState>,
}

type Mutation = Box<dyn FnOnce(&mut CallState) + Send>;

enum Command {
    Event(SfuEvent, Option<oneshot::Sender<()>>),
    Update(Mutation),
}

/// Single writer of a [`CallState`].
///
/// All the mutations (SFU events and local updates) are applied one by one
/// in the order they're submitted, each of them producing a new immutable
/// [`Snapshot`] if the state has changed.
pub struct CallStore {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<ObservableCell<Snapshot>>,
    participant_subs: Arc<Mutex<Vec<mpsc::UnboundedSender<ParticipantEvent>>>>,
    _task: TaskHandle,
}

impl fmt::Debug for CallStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStore")
            .field("version", &self.snapshot.with(|s| s.version))
            .finish()
    }
}

impl CallStore {
    /// Spawns a new [`CallStore`] of the provided [`CallState`].
    #[must_use]
    pub fn new(state: CallState, participants_threshold: usize) -> Self {
        let (commands, mut rx) = mpsc::unbounded();
        let snapshot = Arc::new(ObservableCell::new(Snapshot {
            version: 0,
            state: Arc::new(state.clone()),
        }));
        let participant_subs: Arc<Mutex<Vec<mpsc::UnboundedSender<_>>>> =
            Arc::default();

        let (fut, abort) = future::abortable({
            let snapshot = Arc::clone(&snapshot);
            let subs = Arc::clone(&participant_subs);
            async move {
                let mut state = state;
                let mut version = 0;
                while let Some(cmd) = rx.next().await {
                    let mut done = None;
                    let mut notifications = Vec::new();
                    let changed = match cmd {
                        Command::Event(event, tx) => {
                            let reduction = reducer::reduce(
                                &mut state,
                                participants_threshold,
                                event,
                            );
                            notifications = reduction.notifications;
                            done = tx;
                            reduction.changed
                        }
                        Command::Update(f) => {
                            f(&mut state);
                            snapshot.with(|s| *s.state != state)
                        }
                    };
                    if changed {
                        version += 1;
                        snapshot.set(Snapshot {
                            version,
                            state: Arc::new(state.clone()),
                        });
                    }
                    if !notifications.is_empty() {
                        lock(&subs).retain(|sub| {
                            notifications
                                .iter()
                                .all(|n| sub.unbounded_send(n.clone()).is_ok())
                        });
                    }
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
            }
        });
        drop(tokio::spawn(fut));

        Self {
            commands,
            snapshot,
            participant_subs,
            _task: abort.into(),
        }
    }

    /// Enqueues the provided [`SfuEvent`] without waiting for its
    /// application.
    pub fn dispatch(&self, event: SfuEvent) {
        if self
            .commands
            .unbounded_send(Command::Event(event, None))
            .is_err()
        {
            log::debug!("Event dropped: call store is closed");
        }
    }

    /// Applies the provided [`SfuEvent`], resolving once it's reflected in
    /// the [`Snapshot`].
    ///
    /// # Errors
    ///
    /// With [`StoreClosed`] if this [`CallStore`] has been closed.
    pub async fn apply(&self, event: SfuEvent) -> Result<(), StoreClosed> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .unbounded_send(Command::Event(event, Some(tx)))
            .map_err(|_| StoreClosed)?;
        rx.await.map_err(|_| StoreClosed)
    }

    /// Applies the provided mutation, resolving with its result once it's
    /// reflected in the [`Snapshot`].
    ///
    /// # Errors
    ///
    /// With [`StoreClosed`] if this [`CallStore`] has been closed.
    pub async fn update<R, F>(&self, f: F) -> Result<R, StoreClosed>
    where
        F: FnOnce(&mut CallState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.commands
            .unbounded_send(Command::Update(Box::new(move |state| {
                let _ = tx.send(f(state));
            })))
            .map_err(|_| StoreClosed)?;
        rx.await.map_err(|_| StoreClosed)
    }

    /// Returns the current [`Snapshot`].
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.get()
    }

    /// Returns the current [`CallState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> Arc<CallState> {
        self.snapshot.with(|s| Arc::clone(&s.state))
    }

    /// Returns a stream of the [`Snapshot`]s, starting with the current one.
    #[inline]
    pub fn subscribe(&self) -> BoxStream<'static, Snapshot> {
        self.snapshot.subscribe()
    }

    /// Returns a stream of the participants joining and leaving the call.
    pub fn on_participant_event(&self) -> BoxStream<'static, ParticipantEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.participant_subs).push(tx);
        Box::pin(rx)
    }

    /// Stops accepting new mutations, the already enqueued ones are still
    /// applied.
    pub fn close(&self) {
        self.commands.close_channel();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
