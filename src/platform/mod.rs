//! Platform-specific primitives the orchestrator is built upon.
//!
//! The media engine (codecs, ICE/DTLS/SRTP transport), local media capturing
//! and network reachability detection are provided by the host application
//! through the traits of this module. A WebSocket [`RpcTransport`] built on
//! [`tokio_tungstenite`] is provided out of the box.

mod media;
mod network;
mod peer_connection;
mod transport;
mod websocket;

#[doc(inline)]
pub use self::{
    media::{
        CameraPosition, MediaKind, MediaSource, MediaSourceError,
        MediaStreamTrack,
    },
    network::{NetworkMonitor, NetworkStatus},
    peer_connection::{
        IceCandidate, PeerConnectionFactory, PeerConnectionState,
        RemoteStream, RtcConfiguration, RtcEvent, RtcPeerConnection,
        RtcPeerConnectionError, RtpEncoding, SdpType, SessionDescription,
        Transceiver, TransceiverDirection, TransceiverInit,
    },
    transport::{
        CloseMsg, RpcTransport, RpcTransportFactory, TransportError,
        TransportState,
    },
    websocket::{WebSocketTransport, WebSocketTransportFactory},
};

#[cfg(test)]
pub use self::{
    peer_connection::{MockRtcPeerConnection, MockTransceiver},
    transport::MockRpcTransport,
};
