//! Network reachability.

use derive_more::Display;
use futures::stream::BoxStream;

/// Reachability of the network.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum NetworkStatus {
    Available,
    Unavailable,
}

/// Source of [`NetworkStatus`] changes.
pub trait NetworkMonitor: Send + Sync {
    /// Returns a [`BoxStream`] of [`NetworkStatus`] changes.
    fn subscribe(&self) -> BoxStream<'static, NetworkStatus>;
}
