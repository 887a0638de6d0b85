//! Peer connection primitive of the media engine.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tandem_sfu_proto::IceServer;
use tracerr::Traced;

use super::MediaStreamTrack;

/// Aggregated state of a peer connection's transports.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// Indicates whether the connectivity is lost in this state.
    #[inline]
    #[must_use]
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

/// Type of a [`SessionDescription`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description of one side of a negotiation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Creates a new offer [`SessionDescription`].
    #[inline]
    #[must_use]
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp,
        }
    }

    /// Creates a new answer [`SessionDescription`].
    #[inline]
    #[must_use]
    pub fn answer(sdp: String) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp,
        }
    }
}

/// ICE candidate in the JSON representation exchanged with the SFU.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

/// Configuration of a new peer connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
}

/// Direction of a [`Transceiver`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TransceiverDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
    Inactive,
}

/// Single encoding of an outgoing track.
#[derive(Clone, Debug, PartialEq)]
pub struct RtpEncoding {
    /// Restriction identifier of this encoding.
    pub rid: String,

    /// Indicates whether this encoding is being sent.
    pub active: bool,

    /// Maximum bitrate of this encoding, in bits per second.
    pub max_bitrate: u32,

    /// Factor the resolution of this encoding is scaled down by.
    pub scale_resolution_down_by: f64,
}

/// Parameters of a new [`Transceiver`].
#[derive(Clone, Debug)]
pub struct TransceiverInit {
    pub direction: TransceiverDirection,
    pub stream_ids: Vec<String>,
    pub send_encodings: Vec<RtpEncoding>,
}

/// Stream received from the SFU.
#[derive(Clone, Debug)]
pub struct RemoteStream {
    /// ID of this stream, in `{track_lookup_prefix}:{track_type}` format.
    pub id: String,

    /// Tracks of this stream.
    pub tracks: Vec<Arc<dyn MediaStreamTrack>>,
}

/// Event emitted by an [`RtcPeerConnection`].
#[derive(Clone, Debug)]
pub enum RtcEvent {
    /// New local ICE candidate discovered.
    IceCandidate(IceCandidate),

    /// [`PeerConnectionState`] changed.
    ConnectionStateChanged(PeerConnectionState),

    /// Renegotiation is required.
    NegotiationNeeded,

    /// New remote stream has been added.
    StreamAdded(RemoteStream),

    /// Remote stream with the provided ID has been removed.
    StreamRemoved(String),
}

/// Errors of an [`RtcPeerConnection`].
#[derive(Clone, Debug, Display)]
pub enum RtcPeerConnectionError {
    #[display(fmt = "Failed to create peer connection: {}", _0)]
    PeerCreationError(String),

    #[display(fmt = "Failed to create SDP offer: {}", _0)]
    CreateOfferFailed(String),

    #[display(fmt = "Failed to create SDP answer: {}", _0)]
    CreateAnswerFailed(String),

    #[display(fmt = "Failed to set local SDP description: {}", _0)]
    SetLocalDescriptionFailed(String),

    #[display(fmt = "Failed to set remote SDP description: {}", _0)]
    SetRemoteDescriptionFailed(String),

    #[display(fmt = "Failed to add ICE candidate: {}", _0)]
    AddIceCandidateFailed(String),

    #[display(fmt = "Failed to add transceiver: {}", _0)]
    AddTransceiverFailed(String),

    #[display(fmt = "Failed to update encodings: {}", _0)]
    SetEncodingsFailed(String),
}

/// Send/receive unit of an [`RtcPeerConnection`].
#[cfg_attr(test, mockall::automock)]
pub trait Transceiver: Send + Sync {
    /// Media ID of this [`Transceiver`], once negotiated.
    fn mid(&self) -> Option<String>;

    /// Current encodings of the outgoing track.
    fn encodings(&self) -> Vec<RtpEncoding>;

    /// Updates encodings of the outgoing track.
    ///
    /// # Errors
    ///
    /// If the media engine rejects the provided encodings.
    fn set_encodings(
        &self,
        encodings: Vec<RtpEncoding>,
    ) -> Result<(), Traced<RtcPeerConnectionError>>;

    /// Replaces the outgoing track of this [`Transceiver`].
    fn replace_track(&self, track: Option<Arc<dyn MediaStreamTrack>>);

    /// Permanently stops this [`Transceiver`].
    fn stop(&self);
}

/// Peer connection primitive of the media engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RtcPeerConnection: Send + Sync {
    /// Creates a new SDP offer.
    async fn create_offer(
        &self,
        ice_restart: bool,
    ) -> Result<SessionDescription, Traced<RtcPeerConnectionError>>;

    /// Creates a new SDP answer to the current remote offer.
    async fn create_answer(
        &self,
    ) -> Result<SessionDescription, Traced<RtcPeerConnectionError>>;

    /// Applies the local session description.
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Traced<RtcPeerConnectionError>>;

    /// Applies the remote session description.
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Traced<RtcPeerConnectionError>>;

    /// Adds a remote ICE candidate.
    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Traced<RtcPeerConnectionError>>;

    /// Adds a new [`Transceiver`] sending the provided track.
    fn add_transceiver(
        &self,
        track: Arc<dyn MediaStreamTrack>,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>, Traced<RtcPeerConnectionError>>;

    /// Marks ICE to be restarted on the next negotiation.
    fn restart_ice(&self);

    /// Current [`PeerConnectionState`].
    fn connection_state(&self) -> PeerConnectionState;

    /// Returns a [`BoxStream`] of all the [`RtcEvent`]s emitted by this
    /// peer connection from now on.
    fn subscribe(&self) -> BoxStream<'static, RtcEvent>;

    /// Closes this peer connection.
    fn close(&self);
}

impl fmt::Debug for dyn RtcPeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcPeerConnection")
            .field("state", &self.connection_state())
            .finish()
    }
}

/// Factory of [`RtcPeerConnection`]s.
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates a new [`RtcPeerConnection`] with the provided
    /// [`RtcConfiguration`].
    ///
    /// # Errors
    ///
    /// If the media engine fails to create it.
    fn create_peer_connection(
        &self,
        config: &RtcConfiguration,
    ) -> Result<Arc<dyn RtcPeerConnection>, Traced<RtcPeerConnectionError>>;
}
