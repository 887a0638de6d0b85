//! Unary requests and responses of the SFU signal service.

use serde::{Deserialize, Serialize};

use crate::models::{
    IceTrickle, PeerType, SfuError, TrackInfo, TrackMuteState,
    TrackSubscriptionDetails,
};

/// Method of the SFU signal service.
pub trait SignalMethod: Serialize {
    /// Response of this method.
    type Response: for<'de> Deserialize<'de> + SignalResponse;

    /// Name of this method as used in its route.
    const NAME: &'static str;
}

/// Response of a [`SignalMethod`] possibly carrying an [`SfuError`].
pub trait SignalResponse {
    /// Returns the [`SfuError`] reported in this response, if any.
    fn error(&self) -> Option<&SfuError>;
}

/// Response carrying nothing but a possible [`SfuError`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct EmptyResponse {
    pub error: Option<SfuError>,
}

impl SignalResponse for EmptyResponse {
    #[inline]
    fn error(&self) -> Option<&SfuError> {
        self.error.as_ref()
    }
}

/// Sends a publisher offer, answered with an SDP answer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SetPublisherRequest {
    pub sdp: String,
    pub session_id: String,
    pub tracks: Vec<TrackInfo>,
}

/// Answer to a [`SetPublisherRequest`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SetPublisherResponse {
    pub sdp: String,
    pub session_id: String,
    pub ice_restart: bool,
    pub error: Option<SfuError>,
}

impl SignalResponse for SetPublisherResponse {
    #[inline]
    fn error(&self) -> Option<&SfuError> {
        self.error.as_ref()
    }
}

impl SignalMethod for SetPublisherRequest {
    type Response = SetPublisherResponse;

    const NAME: &'static str = "SetPublisher";
}

/// Answer to a subscriber offer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SendAnswerRequest {
    pub peer_type: PeerType,
    pub sdp: String,
    pub session_id: String,
}

impl SignalMethod for SendAnswerRequest {
    type Response = EmptyResponse;

    const NAME: &'static str = "SendAnswer";
}

impl SignalMethod for IceTrickle {
    type Response = EmptyResponse;

    const NAME: &'static str = "IceTrickle";
}

/// Replaces the whole set of remote track subscriptions.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdateSubscriptionsRequest {
    pub session_id: String,
    pub tracks: Vec<TrackSubscriptionDetails>,
}

impl SignalMethod for UpdateSubscriptionsRequest {
    type Response = EmptyResponse;

    const NAME: &'static str = "UpdateSubscriptions";
}

/// Informs the SFU about mute states of published tracks.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdateMuteStatesRequest {
    pub session_id: String,
    pub mute_states: Vec<TrackMuteState>,
}

impl SignalMethod for UpdateMuteStatesRequest {
    type Response = EmptyResponse;

    const NAME: &'static str = "UpdateMuteStates";
}

/// Requests an ICE restart of a peer on the SFU side.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IceRestartRequest {
    pub session_id: String,
    pub peer_type: PeerType,
}

impl SignalMethod for IceRestartRequest {
    type Response = EmptyResponse;

    const NAME: &'static str = "IceRestart";
}
