//! Implementation of the [`ObservableField`] and its subscribers.

pub mod cell;

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Mutex,
};

use futures::{
    channel::{mpsc, oneshot},
    future::{self, BoxFuture},
    stream::{self, BoxStream},
    StreamExt as _,
};

use crate::lock;

/// [`ObservableField`] with the default subscribers storage.
pub type Observable<D> = ObservableField<D>;

/// Reactive cell which emits all its modifications to its subscribers.
///
/// Subscribe to all the modifications with [`ObservableField::subscribe`], or
/// wait for a concrete one with [`ObservableField::when`] and
/// [`ObservableField::when_eq`].
pub struct ObservableField<D> {
    /// Data stored by this [`ObservableField`].
    data: D,

    /// Subscribers to the [`ObservableField`]'s data mutations.
    subs: Subscribers<D>,
}

impl<D: fmt::Debug> fmt::Debug for ObservableField<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableField")
            .field("data", &self.data)
            .finish()
    }
}

impl<D> ObservableField<D> {
    /// Returns a new [`ObservableField`] with the provided initial `data`.
    #[inline]
    #[must_use]
    pub fn new(data: D) -> Self {
        Self {
            data,
            subs: Subscribers::default(),
        }
    }
}

impl<D> ObservableField<D>
where
    D: Send + 'static,
{
    /// Returns a [`Future`] resolving when the provided `assert_fn` returns
    /// `true` for the current or any future value of this field.
    ///
    /// [`Future`]: std::future::Future
    pub fn when<F>(
        &self,
        assert_fn: F,
    ) -> BoxFuture<'static, Result<(), DroppedError>>
    where
        F: Fn(&D) -> bool + Send + 'static,
    {
        if (assert_fn)(&self.data) {
            Box::pin(future::ok(()))
        } else {
            self.subs.when(Box::new(assert_fn))
        }
    }
}

impl<D> ObservableField<D>
where
    D: PartialEq + Send + 'static,
{
    /// Returns a [`Future`] resolving when the data of this field becomes
    /// equal to the provided `should_be` value.
    ///
    /// [`Future`]: std::future::Future
    #[inline]
    pub fn when_eq(
        &self,
        should_be: D,
    ) -> BoxFuture<'static, Result<(), DroppedError>> {
        self.when(move |data| data == &should_be)
    }
}

impl<D> ObservableField<D>
where
    D: Clone + Send + 'static,
{
    /// Returns a [`Stream`] of this field's values, starting with the current
    /// one.
    ///
    /// [`Stream`]: futures::Stream
    pub fn subscribe(&self) -> BoxStream<'static, D> {
        let data = self.data.clone();
        let changes = self.subs.subscribe();

        Box::pin(stream::once(async move { data }).chain(changes))
    }
}

impl<D> ObservableField<D>
where
    D: Clone + PartialEq,
{
    /// Returns a [`MutObservableFieldGuard`] mutably dereferencing to the
    /// underlying data.
    ///
    /// Subscribers are notified when the guard is dropped, and only if the
    /// data __really__ changed (checked via [`PartialEq`]).
    #[inline]
    pub fn borrow_mut(&mut self) -> MutObservableFieldGuard<'_, D> {
        MutObservableFieldGuard {
            value_before_mutation: self.data.clone(),
            data: &mut self.data,
            subs: &self.subs,
        }
    }
}

impl<D> Deref for ObservableField<D> {
    type Target = D;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// Error sent to all the [`ObservableField::when`] waiters once the
/// [`ObservableField`] is dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DroppedError;

impl fmt::Display for DroppedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observable value has been dropped")
    }
}

impl From<oneshot::Canceled> for DroppedError {
    #[inline]
    fn from(_: oneshot::Canceled) -> Self {
        Self
    }
}

/// Single subscriber of an [`ObservableField`].
enum Subscriber<D> {
    /// Waiter of [`ObservableField::when`].
    When {
        sender: oneshot::Sender<()>,
        assert_fn: Box<dyn Fn(&D) -> bool + Send>,
    },

    /// Subscriber of [`ObservableField::subscribe`].
    Subscribe(mpsc::UnboundedSender<D>),
}

/// Thread-safe storage of [`Subscriber`]s.
struct Subscribers<D>(Mutex<Vec<Subscriber<D>>>);

impl<D> Default for Subscribers<D> {
    #[inline]
    fn default() -> Self {
        Self(Mutex::new(Vec::new()))
    }
}

impl<D> Subscribers<D> {
    fn when(
        &self,
        assert_fn: Box<dyn Fn(&D) -> bool + Send>,
    ) -> BoxFuture<'static, Result<(), DroppedError>> {
        let (sender, rx) = oneshot::channel();
        lock(&self.0).push(Subscriber::When { sender, assert_fn });

        Box::pin(async move { Ok(rx.await?) })
    }

    fn subscribe(&self) -> BoxStream<'static, D>
    where
        D: Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.0).push(Subscriber::Subscribe(tx));

        Box::pin(rx)
    }

    /// Notifies all the subscribers about the provided modified `data`,
    /// forgetting the resolved and the closed ones.
    fn on_modify(&self, data: &D)
    where
        D: Clone,
    {
        let mut subs = lock(&self.0);
        for sub in std::mem::take(&mut *subs) {
            match sub {
                Subscriber::When { sender, assert_fn } => {
                    if (assert_fn)(data) {
                        let _ = sender.send(());
                    } else if !sender.is_canceled() {
                        subs.push(Subscriber::When { sender, assert_fn });
                    }
                }
                Subscriber::Subscribe(sender) => {
                    if sender.unbounded_send(data.clone()).is_ok() {
                        subs.push(Subscriber::Subscribe(sender));
                    }
                }
            }
        }
    }
}

/// Mutable reference to an [`ObservableField`] returned by
/// [`ObservableField::borrow_mut`].
///
/// On [`Drop`] the data is checked for modification and, if changed, all the
/// subscribers are notified.
pub struct MutObservableFieldGuard<'a, D>
where
    D: Clone + PartialEq,
{
    data: &'a mut D,
    subs: &'a Subscribers<D>,
    value_before_mutation: D,
}

impl<'a, D> fmt::Debug for MutObservableFieldGuard<'a, D>
where
    D: Clone + PartialEq + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutObservableFieldGuard")
            .field("data", &self.data)
            .finish()
    }
}

impl<'a, D> Deref for MutObservableFieldGuard<'a, D>
where
    D: Clone + PartialEq,
{
    type Target = D;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &*self.data
    }
}

impl<'a, D> DerefMut for MutObservableFieldGuard<'a, D>
where
    D: Clone + PartialEq,
{
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.data
    }
}

impl<'a, D> Drop for MutObservableFieldGuard<'a, D>
where
    D: Clone + PartialEq,
{
    fn drop(&mut self) {
        if *self.data != self.value_before_mutation {
            self.subs.on_modify(&*self.data);
        }
    }
}
