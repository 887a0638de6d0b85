//! Classification of errors reported by the orchestrator.

use derive_more::Display;
use tracerr::Traced;

/// Category of an error, defining how it's handled.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// Socket or HTTP failure, or a timeout.
    ///
    /// Retried according to the retry policies, or leads to a reconnection.
    Transport,

    /// Malformed or unexpected server message.
    ///
    /// Logged and dropped, never affects the rest of the call state.
    Protocol,

    /// Capability required for the requested action is missing.
    ///
    /// Returned to the caller as is and never retried.
    Permission,

    /// Failure the call cannot recover from.
    ///
    /// Moves the call into the error state.
    Unrecoverable,
}

/// Error which may be classified into an [`ErrorKind`].
pub trait Categorized {
    /// Returns the [`ErrorKind`] of this error.
    fn kind(&self) -> ErrorKind;
}

impl<E: Categorized> Categorized for Traced<E> {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.as_ref().kind()
    }
}
