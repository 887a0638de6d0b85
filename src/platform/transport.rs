//! Framed socket to an SFU.

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use tandem_sfu_proto::{SfuEvent, SfuRequest};
use tracerr::Traced;
use url::Url;

/// Reason of an [`RpcTransport`] closing.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum CloseMsg {
    /// Socket was closed normally with the provided code and reason.
    #[display(fmt = "Normal({}, {})", _0, _1)]
    Normal(u16, String),

    /// Socket was closed abnormally with the provided code.
    #[display(fmt = "Abnormal({})", _0)]
    Abnormal(u16),
}

/// State of an [`RpcTransport`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum TransportState {
    /// Socket has been created, the connection is not open yet.
    Connecting,

    /// Connection is open and ready to communicate.
    Open,

    /// Connection is in the process of closing.
    Closing,

    /// Connection has been closed or couldn't be opened.
    #[display(fmt = "Closed({})", _0)]
    Closed(CloseMsg),
}

impl TransportState {
    /// Indicates whether the socket can be used for communication.
    #[inline]
    #[must_use]
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Errors of an [`RpcTransport`].
#[derive(Clone, Debug, Display)]
pub enum TransportError {
    /// Failed to establish a connection.
    #[display(fmt = "Failed to create socket: {}", _0)]
    CreateSocket(String),

    /// Failed to serialize an outgoing message.
    #[display(fmt = "Failed to serialize client message: {}", _0)]
    SerializeClientMessage(String),

    /// Failed to parse an incoming message.
    #[display(fmt = "Failed to parse server message: {}", _0)]
    ParseServerMessage(String),

    /// Failed to send a message.
    #[display(fmt = "Failed to send message: {}", _0)]
    SendMessage(String),

    /// Socket is closed.
    #[display(fmt = "Underlying socket is closed")]
    ClosedSocket,
}

/// Framed JSON socket to an SFU.
#[cfg_attr(test, mockall::automock)]
pub trait RpcTransport: Send + Sync {
    /// Returns a [`BoxStream`] of all the decoded [`SfuEvent`]s received
    /// from now on.
    ///
    /// Undecodable frames are logged and skipped.
    fn on_message(&self) -> BoxStream<'static, SfuEvent>;

    /// Sends the provided [`SfuRequest`].
    ///
    /// # Errors
    ///
    /// If the request cannot be serialized or the socket is closed.
    fn send(&self, msg: &SfuRequest) -> Result<(), Traced<TransportError>>;

    /// Returns a [`BoxStream`] of [`TransportState`] changes, starting with
    /// the current one.
    fn on_state_change(&self) -> BoxStream<'static, TransportState>;

    /// Closes the socket.
    fn close(&self);
}

/// Factory establishing [`RpcTransport`]s.
#[async_trait]
pub trait RpcTransportFactory: Send + Sync {
    /// Connects to the provided [`Url`].
    ///
    /// # Errors
    ///
    /// If the connection cannot be established.
    async fn connect(
        &self,
        url: Url,
    ) -> Result<Arc<dyn RpcTransport>, Traced<TransportError>>;
}
