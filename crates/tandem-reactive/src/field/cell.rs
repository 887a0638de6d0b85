//! Observable analogue of a [`Cell`] which may be shared between threads.
//!
//! [`Cell`]: std::cell::Cell

use std::{fmt, sync::Mutex};

use futures::{future::BoxFuture, stream::BoxStream};

use crate::lock;

use super::{DroppedError, MutObservableFieldGuard, ObservableField};

/// Observable analogue of a [`Cell`].
///
/// Subscriptions work the same way as for [`ObservableField`], but the data
/// is accessed via copies and closures only, so the cell can be shared via
/// [`Arc`].
///
/// ```
/// use tandem_reactive::ObservableCell;
///
/// let foo = ObservableCell::new(0i32);
/// foo.set(100);
/// assert_eq!(foo.get(), 100);
///
/// let old_value = foo.replace(200);
/// assert_eq!(old_value, 100);
///
/// foo.mutate(|mut data| *data = 300);
/// assert_eq!(foo.get(), 300);
/// ```
///
/// [`Arc`]: std::sync::Arc
/// [`Cell`]: std::cell::Cell
pub struct ObservableCell<D>(Mutex<ObservableField<D>>);

impl<D: fmt::Debug> fmt::Debug for ObservableCell<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservableCell").field(&*lock(&self.0)).finish()
    }
}

impl<D> ObservableCell<D> {
    /// Returns a new [`ObservableCell`] containing the provided `data`.
    #[inline]
    #[must_use]
    pub fn new(data: D) -> Self {
        Self(Mutex::new(ObservableField::new(data)))
    }

    /// Calls the provided `f` with a reference to the underlying data.
    #[inline]
    pub fn with<R, F: FnOnce(&D) -> R>(&self, f: F) -> R {
        f(&*lock(&self.0))
    }
}

impl<D> ObservableCell<D>
where
    D: Clone,
{
    /// Returns a copy of the underlying data.
    #[inline]
    #[must_use]
    pub fn get(&self) -> D {
        (**lock(&self.0)).clone()
    }
}

impl<D> ObservableCell<D>
where
    D: Clone + PartialEq,
{
    /// Sets the underlying data to the provided `new_data`.
    #[inline]
    pub fn set(&self, new_data: D) {
        drop(self.replace(new_data));
    }

    /// Replaces the underlying data with the provided `new_data`, returning
    /// the old one.
    pub fn replace(&self, mut new_data: D) -> D {
        let mut field = lock(&self.0);
        std::mem::swap(&mut *field.borrow_mut(), &mut new_data);
        new_data
    }

    /// Mutates the underlying data with the provided closure.
    ///
    /// Subscribers are notified only if the data has really changed.
    pub fn mutate<F>(&self, f: F)
    where
        F: FnOnce(MutObservableFieldGuard<'_, D>),
    {
        let mut field = lock(&self.0);
        f(field.borrow_mut());
    }
}

impl<D> ObservableCell<D>
where
    D: Clone + Send + 'static,
{
    /// Returns a [`Stream`] of this cell's values, starting with the current
    /// one.
    ///
    /// [`Stream`]: futures::Stream
    #[inline]
    pub fn subscribe(&self) -> BoxStream<'static, D> {
        lock(&self.0).subscribe()
    }
}

impl<D> ObservableCell<D>
where
    D: Send + 'static,
{
    /// Returns a [`Future`] resolving when the provided `assert_fn` returns
    /// `true` for the current or any future value of this cell.
    ///
    /// [`Future`]: std::future::Future
    #[inline]
    pub fn when<F>(
        &self,
        assert_fn: F,
    ) -> BoxFuture<'static, Result<(), DroppedError>>
    where
        F: Fn(&D) -> bool + Send + 'static,
    {
        lock(&self.0).when(assert_fn)
    }
}

impl<D> ObservableCell<D>
where
    D: PartialEq + Send + 'static,
{
    /// Returns a [`Future`] resolving when the data of this cell becomes
    /// equal to the provided `should_be` value.
    ///
    /// [`Future`]: std::future::Future
    #[inline]
    pub fn when_eq(
        &self,
        should_be: D,
    ) -> BoxFuture<'static, Result<(), DroppedError>> {
        lock(&self.0).when_eq(should_be)
    }
}

#[cfg(test)]
mod spec {
    use std::sync::Arc;

    use futures::StreamExt as _;

    use super::ObservableCell;

    #[tokio::test]
    async fn emits_only_real_changes() {
        let cell = ObservableCell::new(1u8);
        let mut changes = cell.subscribe();
        assert_eq!(changes.next().await, Some(1));

        cell.set(1);
        cell.set(2);
        assert_eq!(changes.next().await, Some(2));
    }

    #[tokio::test]
    async fn when_eq_resolves_from_another_task() {
        let cell = Arc::new(ObservableCell::new(0u32));
        let when = cell.when_eq(3);

        let writer = Arc::clone(&cell);
        tokio::spawn(async move {
            for i in 1..=3 {
                writer.set(i);
            }
        });

        when.await.unwrap();
        assert_eq!(cell.get(), 3);
    }

    #[tokio::test]
    async fn mutate_notifies_subscribers() {
        let cell = ObservableCell::new(vec![1]);
        let mut changes = cell.subscribe().skip(1);
        cell.mutate(|mut v| v.push(2));
        assert_eq!(changes.next().await, Some(vec![1, 2]));
    }
}
