//! Abstraction over the SFU signaling: the persistent socket and the unary
//! signal service.

mod channel;
mod heartbeat;
pub mod http;
mod signal;

use derive_more::{Display, From};
use tandem_sfu_proto::IceServer;
use url::Url;

use crate::{
    platform::TransportError,
    utils::{Categorized, ErrorKind, Retryable},
};

#[doc(inline)]
pub use self::{
    channel::{ChannelState, ClosedReason, SfuChannel},
    heartbeat::{Heartbeat, IdleTimeout, PingInterval},
    signal::{SignalError, SignalServer, SignalService, SignalServiceFactory},
};

#[cfg(test)]
pub use self::signal::MockSignalService;

/// SFU instance a session is connected to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SfuServer {
    /// Name of the SFU edge, identifying the instance.
    pub edge_name: String,

    /// Base [`Url`] of the unary signal service.
    pub url: Url,

    /// [`Url`] of the socket endpoint.
    pub ws_endpoint: Url,
}

/// Credentials of a session on some SFU, issued by the coordinator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SfuCredentials {
    /// SFU instance to connect to.
    pub server: SfuServer,

    /// Token authorizing the session on the SFU.
    pub token: String,

    /// ICE servers to use for the peer connections.
    pub ice_servers: Vec<IceServer>,
}

/// Errors of an [`SfuChannel`].
#[derive(Clone, Debug, Display, From)]
pub enum RpcClientError {
    /// Occurs if the socket cannot be established.
    #[display(fmt = "Connection failed: {}", _0)]
    #[from(ignore)]
    CouldNotEstablish(TransportError),

    /// Occurs if the socket isn't established in time.
    #[display(fmt = "Connection timed out")]
    ConnectTimeout,

    /// Occurs if a message is sent over a closed channel.
    #[display(fmt = "Channel is not connected")]
    NotConnected,

    /// Occurs if the underlying transport fails to send a message.
    #[display(fmt = "Transport error: {}", _0)]
    Transport(TransportError),
}

impl Categorized for RpcClientError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::CouldNotEstablish(_)
            | Self::ConnectTimeout
            | Self::NotConnected
            | Self::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl Retryable for RpcClientError {
    #[inline]
    fn is_retryable(&self) -> bool {
        true
    }
}
