//! Reactive mutable data containers which can be shared between threads.
//!
//! # Basic interaction with an `ObservableField`
//!
//! ```
//! use tandem_reactive::Observable;
//! # use futures::{executor, StreamExt as _};
//!
//! # executor::block_on(async {
//! let mut foo = Observable::new(0u32);
//! let mut changes = foo.subscribe();
//!
//! // Current value is emitted first:
//! assert_eq!(changes.next().await.unwrap(), 0);
//!
//! *foo.borrow_mut() = 1;
//! assert_eq!(changes.next().await.unwrap(), 1);
//!
//! // Nothing is emitted if the value hasn't really changed:
//! *foo.borrow_mut() = 1;
//! *foo.borrow_mut() = 2;
//! assert_eq!(changes.next().await.unwrap(), 2);
//! # });
//! ```

#![deny(broken_intra_doc_links, missing_debug_implementations)]
#![allow(clippy::module_name_repetitions)]

pub mod field;

#[doc(inline)]
pub use crate::field::{
    cell::ObservableCell, DroppedError, MutObservableFieldGuard, Observable,
    ObservableField,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks the provided [`Mutex`] ignoring its poisoning.
///
/// Data guarded by the containers of this crate stays consistent even if some
/// subscriber panicked, so poisoning carries no useful information here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
