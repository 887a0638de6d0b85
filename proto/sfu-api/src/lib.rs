//! SFU signaling protocol of [Tandem] SFU client.
//!
//! Messages are JSON-encoded. Socket frames carry [`SfuRequest`]s from the
//! client and [`SfuEvent`]s from the SFU, while unary calls of the signal
//! service are described in the [`signal`] module.
//!
//! [Tandem]: https://docs.rs/tandem

#![deny(broken_intra_doc_links, missing_debug_implementations)]

pub mod models;
pub mod signal;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tandem_macro::dispatchable;

#[doc(inline)]
pub use self::models::{
    AudioLevel, CallGrants, CallState, ConnectionQuality,
    ConnectionQualityInfo, GoAwayReason, IceServer, IceTrickle, Participant,
    ParticipantCount, PeerType, Pin, ReconnectDetails, ReconnectStrategy,
    SfuError, TrackInfo, TrackMuteState, TrackSubscriptionDetails, TrackType,
    VideoDimension, VideoLayer, VideoLayerSetting, VideoSender,
};

/// Message sent by the client over the SFU socket.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "request", content = "data", rename_all = "snake_case")]
pub enum SfuRequest {
    /// Joins the call (or re-joins it on reconnection and migration).
    Join(JoinRequest),

    /// Heartbeat ping.
    HealthCheck,

    /// Informs the SFU that the session is leaving the call.
    LeaveCall {
        session_id: String,
        reason: String,
    },
}

/// Request joining a call on some SFU.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JoinRequest {
    /// Token authorizing the session on the SFU.
    pub token: String,

    /// ID of the joining session.
    pub session_id: String,

    /// Throwaway subscriber offer advertising the receive capabilities.
    pub subscriber_sdp: String,

    /// Indicates whether this request is a part of a fast reconnect.
    #[serde(default)]
    pub fast_reconnect: bool,

    /// Details of the reconnection or migration this request is a part of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_details: Option<ReconnectDetails>,
}

/// Reason of a call end sent by the SFU.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CallEndedReason {
    Unspecified,
    Ended,
    LiveEnded,
    Kicked,
    SessionEnded,
}

/// Event sent by the SFU over its socket.
#[dispatchable]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SfuEvent {
    /// SFU offers a new subscriber session description.
    SubscriberOffer { sdp: String, ice_restart: bool },

    /// SFU answered the publisher out of band.
    PublisherAnswer { sdp: String },

    /// Connection qualities of some participants changed.
    ConnectionQualityChanged {
        connection_quality_updates: Vec<ConnectionQualityInfo>,
    },

    /// Audio levels of some participants changed.
    AudioLevelChanged { audio_levels: Vec<AudioLevel> },

    /// New ICE candidate discovered by the SFU.
    IceTrickle(IceTrickle),

    /// SFU asks to change the simulcast layers of the published video.
    ChangePublishQuality { video_senders: Vec<VideoSender> },

    /// New participant joined the call.
    ParticipantJoined {
        call_cid: String,
        participant: Participant,
    },

    /// Participant left the call.
    ParticipantLeft {
        call_cid: String,
        participant: Participant,
    },

    /// Participant's record has been updated.
    ParticipantUpdated {
        call_cid: String,
        participant: Participant,
    },

    /// Dominant speaker of the call changed.
    DominantSpeakerChanged { user_id: String, session_id: String },

    /// Response to a [`JoinRequest`].
    JoinResponse {
        call_state: CallState,
        reconnected: bool,
        #[serde(default)]
        fast_reconnect_deadline_seconds: u32,
        #[serde(default)]
        ice_servers: Vec<IceServer>,
    },

    /// Response to a [`SfuRequest::HealthCheck`].
    HealthCheckResponse { participant_count: ParticipantCount },

    /// Participant published a track.
    TrackPublished {
        user_id: String,
        session_id: String,
        track_type: TrackType,
        #[serde(default)]
        participant: Option<Participant>,
    },

    /// Participant unpublished a track.
    TrackUnpublished {
        user_id: String,
        session_id: String,
        track_type: TrackType,
        #[serde(default)]
        participant: Option<Participant>,
    },

    /// SFU reported an error and the strategy to recover from it.
    Error {
        error: SfuError,
        reconnect_strategy: ReconnectStrategy,
    },

    /// Publishing permissions of the local participant changed.
    CallGrantsUpdated { current_grants: CallGrants },

    /// SFU asks the client to migrate to another SFU.
    GoAway { reason: GoAwayReason },

    /// SFU asks the client to restart ICE of the provided peer.
    IceRestart { peer_type: PeerType },

    /// Server-wide pins changed.
    PinsChanged { pins: Vec<Pin> },

    /// Call has ended for this session.
    CallEnded { reason: CallEndedReason },

    /// Migration of this session to the SFU has been completed.
    ParticipantMigrationComplete,
}

impl SfuEvent {
    /// Indicates whether this [`SfuEvent`] changes the call's participant
    /// state.
    #[must_use]
    pub fn affects_call_state(&self) -> bool {
        !matches!(
            self,
            Self::SubscriberOffer { .. }
                | Self::PublisherAnswer { .. }
                | Self::IceTrickle(_)
                | Self::Error { .. }
                | Self::GoAway { .. }
                | Self::IceRestart { .. }
                | Self::CallEnded { .. }
                | Self::ParticipantMigrationComplete
        )
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn event_is_tagged_by_snake_case_name() {
        let event: SfuEvent = serde_json::from_str(
            r#"{
                "event": "track_published",
                "data": {
                    "user_id": "u1",
                    "session_id": "s1",
                    "track_type": "screen_share"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            event,
            SfuEvent::TrackPublished {
                user_id: "u1".into(),
                session_id: "s1".into(),
                track_type: TrackType::ScreenShare,
                participant: None,
            },
        );
    }

    #[test]
    fn unit_request_has_no_data() {
        assert_eq!(
            serde_json::to_string(&SfuRequest::HealthCheck).unwrap(),
            r#"{"request":"health_check"}"#,
        );
    }

    #[test]
    fn join_request_omits_absent_reconnect_details() {
        let json = serde_json::to_value(&SfuRequest::Join(JoinRequest {
            token: "t".into(),
            session_id: "s".into(),
            subscriber_sdp: "sdp".into(),
            fast_reconnect: false,
            reconnect_details: None,
        }))
        .unwrap();

        assert!(json["data"].get("reconnect_details").is_none());
        assert_eq!(json["data"]["token"], "t");
    }

    #[test]
    fn unknown_event_fails_to_decode() {
        serde_json::from_str::<SfuEvent>(r#"{"event":"foo","data":{}}"#)
            .unwrap_err();
    }
}
