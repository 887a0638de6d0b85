//! Data models shared between the socket messages and the signal service.

use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};

/// Kind of a media track published by a participant.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq,
    PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    /// Microphone audio.
    Audio,

    /// Camera video.
    Video,

    /// Captured screen video.
    #[display(fmt = "screen_share")]
    ScreenShare,

    /// Audio accompanying a screen capture.
    #[display(fmt = "screen_share_audio")]
    ScreenShareAudio,
}

impl TrackType {
    /// Indicates whether this [`TrackType`] carries video.
    #[inline]
    #[must_use]
    pub fn is_video(self) -> bool {
        matches!(self, Self::Video | Self::ScreenShare)
    }
}

/// Role of a peer connection in a media session.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PeerType {
    /// Peer carrying locally produced tracks.
    Publisher,

    /// Peer receiving the SFU's remote streams.
    Subscriber,
}

/// Connection quality of a participant as estimated by the SFU.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Unspecified,
    Poor,
    Good,
    Excellent,
}

impl Default for ConnectionQuality {
    #[inline]
    fn default() -> Self {
        Self::Unspecified
    }
}

/// Width and height of a video frame, in pixels.
#[derive(
    Clone,
    Constructor,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
)]
pub struct VideoDimension {
    pub width: u32,
    pub height: u32,
}

impl VideoDimension {
    /// Indicates whether this [`VideoDimension`] describes an empty frame.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Single simulcast layer of an outgoing video track.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoLayer {
    /// Restriction identifier of this layer (`f`, `h` or `q`).
    pub rid: String,

    /// Frame size of this layer.
    pub video_dimension: VideoDimension,

    /// Maximum bitrate of this layer, in bits per second.
    pub bitrate: u32,

    /// Maximum frame rate of this layer.
    pub fps: u32,
}

/// Track being published or announced to the SFU.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TrackInfo {
    pub track_id: String,
    pub track_type: TrackType,
    pub mid: Option<String>,
    #[serde(default)]
    pub layers: Vec<VideoLayer>,
    #[serde(default)]
    pub dtx: bool,
    #[serde(default)]
    pub red: bool,
    #[serde(default)]
    pub muted: bool,
}

/// Participant record as sent by the SFU.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Participant {
    pub user_id: String,
    pub session_id: String,
    pub published_tracks: Vec<TrackType>,
    pub joined_at: Option<String>,
    pub track_lookup_prefix: String,
    pub connection_quality: ConnectionQuality,
    pub is_speaking: bool,
    pub is_dominant_speaker: bool,
    pub audio_level: f32,
    pub name: String,
    pub image: String,
    pub roles: Vec<String>,
}

/// Total and anonymous participant counters.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(default)]
pub struct ParticipantCount {
    pub total: u32,
    pub anonymous: u32,
}

/// Server-wide pin of a participant's session.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Pin {
    pub user_id: String,
    pub session_id: String,
}

/// Snapshot of a call as enumerated by the SFU in a join response.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CallState {
    pub participants: Vec<Participant>,
    pub started_at: Option<String>,
    pub participant_count: ParticipantCount,
    pub pins: Vec<Pin>,
}

/// ICE server configuration advertised by the SFU.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// ICE candidate exchanged for a concrete peer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceTrickle {
    /// Peer the candidate belongs to.
    pub peer_type: PeerType,

    /// JSON-encoded candidate (`candidate`, `sdpMid`, `sdpMLineIndex`).
    pub ice_candidate: String,

    pub session_id: String,
}

/// Error reported by the SFU.
#[derive(Clone, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[display(fmt = "SFU error {}: {}", code, message)]
pub struct SfuError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub should_retry: bool,
}

/// Recovery strategy the SFU asks the client to follow.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    Unspecified,
    Disconnect,
    Fast,
    Rejoin,
    Migrate,
}

impl Default for ReconnectStrategy {
    #[inline]
    fn default() -> Self {
        Self::Unspecified
    }
}

/// Reason of a `GoAway` signal.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GoAwayReason {
    Unspecified,
    ShuttingDown,
    Rebalance,
}

/// Details of a reconnection attached to a join request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ReconnectDetails {
    pub strategy: ReconnectStrategy,
    pub announced_tracks: Vec<TrackInfo>,
    pub subscriptions: Vec<TrackSubscriptionDetails>,
    pub reconnect_attempt: u32,
    pub from_sfu_id: String,
    pub previous_session_id: String,
}

/// Desired subscription to a single remote track.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct TrackSubscriptionDetails {
    pub user_id: String,
    pub session_id: String,
    pub track_type: TrackType,
    pub dimension: Option<VideoDimension>,
}

/// Mute state of a single published track.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrackMuteState {
    pub track_type: TrackType,
    pub muted: bool,
}

/// Connection quality update of a single participant.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnectionQualityInfo {
    pub user_id: String,
    pub session_id: String,
    pub connection_quality: ConnectionQuality,
}

/// Audio level update of a single participant.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AudioLevel {
    pub user_id: String,
    pub session_id: String,
    pub level: f32,
    pub is_speaking: bool,
}

/// Desired activation of an encoding layer of an outgoing video track.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoLayerSetting {
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub max_bitrate: Option<u32>,
    #[serde(default)]
    pub scale_resolution_down_by: Option<u32>,
}

/// Publish quality requested by the SFU for an outgoing video track.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoSender {
    pub track_type: TrackType,
    pub layers: Vec<VideoLayerSetting>,
}

/// Publishing permissions granted to the local participant.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(default)]
pub struct CallGrants {
    pub can_publish_audio: bool,
    pub can_publish_video: bool,
    pub can_screenshare: bool,
}
