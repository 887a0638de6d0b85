//! Buffer of remote [`IceCandidate`]s received before the remote description.

use std::mem;

use crate::platform::IceCandidate;

/// Remote [`IceCandidate`]s of a [`PeerConnection`] which cannot be applied
/// yet.
///
/// Candidates are kept in their arrival order until the remote description
/// is set, after which they are flushed and any new candidate is passed
/// through as is.
///
/// [`PeerConnection`]: super::PeerConnection
#[derive(Debug, Default)]
pub struct IceCandidates {
    /// Indicates whether the remote description has been set.
    has_remote_description: bool,

    /// Candidates waiting for the remote description.
    buffer: Vec<IceCandidate>,
}

impl IceCandidates {
    /// Returns a new empty [`IceCandidates`] buffer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers the provided [`IceCandidate`] if the remote description is
    /// not set yet, otherwise returns it back to be applied right away.
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.has_remote_description {
            Some(candidate)
        } else {
            self.buffer.push(candidate);
            None
        }
    }

    /// Marks the remote description as set, returning all the buffered
    /// [`IceCandidate`]s in their arrival order.
    pub fn flush(&mut self) -> Vec<IceCandidate> {
        self.has_remote_description = true;
        mem::take(&mut self.buffer)
    }

    /// Number of the buffered [`IceCandidate`]s.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Indicates whether there are no buffered [`IceCandidate`]s.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
