//! Interface of the coordinator API the call metadata comes from.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracerr::Traced;

use crate::{
    rpc::SfuCredentials,
    utils::{Categorized, ErrorKind, Retryable},
};

/// Capability of the local user in a call.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum OwnCapability {
    SendAudio,
    SendVideo,
    Screenshare,
    PinForEveryone,
    JoinCall,
    EndCall,
}

/// Audio settings of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct AudioSettings {
    pub mic_default_on: bool,
    pub speaker_default_on: bool,
}

/// Video settings of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct VideoSettings {
    pub enabled: bool,
    pub camera_default_on: bool,
}

/// Screen sharing settings of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ScreensharingSettings {
    pub enabled: bool,
}

/// Settings of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CallSettings {
    pub audio: AudioSettings,
    pub video: VideoSettings,
    pub screensharing: ScreensharingSettings,
}

/// Participant of an ongoing call session as seen by the coordinator.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionParticipant {
    pub user_id: String,
    pub user_session_id: String,
    pub joined_at: DateTime<Utc>,
}

/// Ongoing session of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CallSessionResponse {
    pub id: String,
    pub participants: Vec<SessionParticipant>,
    pub accepted_by: HashMap<String, DateTime<Utc>>,
    pub rejected_by: HashMap<String, DateTime<Utc>>,
    pub live_started_at: Option<DateTime<Utc>>,
    pub live_ended_at: Option<DateTime<Utc>>,
}

/// Egress (broadcasting) state of a call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct EgressResponse {
    pub broadcasting: bool,
    pub hls_playlist_url: Option<String>,
}

/// User record of the coordinator.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct UserResponse {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub role: String,
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// Call metadata of the coordinator.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CallResponse {
    pub cid: String,
    pub call_type: String,
    pub id: String,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub backstage: bool,
    #[serde(default)]
    pub recording: bool,
    #[serde(default)]
    pub transcribing: bool,
    #[serde(default)]
    pub blocked_user_ids: Vec<String>,
    #[serde(default)]
    pub settings: CallSettings,
    #[serde(default)]
    pub session: Option<CallSessionResponse>,
    #[serde(default)]
    pub egress: EgressResponse,
    pub created_by: UserResponse,
    #[serde(default)]
    pub team: Option<String>,
}

/// Member of a call.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MemberResponse {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters of joining a call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JoinCallRequest {
    pub call_type: String,
    pub call_id: String,

    /// Creates the call if it doesn't exist.
    pub create: bool,

    /// Rings the other members of the call.
    pub ring: bool,

    /// Name of the SFU edge the session is migrating from, if any.
    pub migrating_from: Option<String>,
}

/// Response to a [`JoinCallRequest`].
#[derive(Clone, Debug)]
pub struct JoinCallResponse {
    pub call: CallResponse,
    pub members: Vec<MemberResponse>,
    pub own_capabilities: Vec<OwnCapability>,
    pub credentials: SfuCredentials,
}

/// Event of the coordinator relevant to the state of a call.
#[derive(Clone, Debug, PartialEq)]
pub enum CoordinatorEvent {
    BlockedUser { user_id: String },
    UnblockedUser { user_id: String },
    CallAccepted { user_id: String, at: DateTime<Utc> },
    CallRejected { user_id: String, at: DateTime<Utc> },
    RecordingStarted,
    RecordingStopped,
    TranscriptionStarted,
    TranscriptionStopped,
    CallUpdated(Box<CallResponse>),
    CallEnded { at: DateTime<Utc> },
}

/// Errors of a [`CoordinatorApi`] call.
#[derive(Clone, Debug, Display)]
pub enum CoordinatorError {
    /// Request couldn't be delivered or its response couldn't be received.
    #[display(fmt = "Coordinator transport error: {}", _0)]
    Transport(String),

    /// Local user isn't allowed to perform the request.
    #[display(fmt = "Not allowed: {}", _0)]
    Forbidden(String),

    /// Coordinator rejected the request.
    #[display(fmt = "Coordinator error {}: {}", code, message)]
    Api { code: u16, message: String },
}

impl Categorized for CoordinatorError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Forbidden(_) => ErrorKind::Permission,
            Self::Api { .. } => ErrorKind::Unrecoverable,
        }
    }
}

impl Retryable for CoordinatorError {
    #[inline]
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Coordinator API managing calls and issuing SFU credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    /// Joins (and optionally creates) a call, returning its metadata and
    /// credentials of a session on some SFU.
    async fn join_call(
        &self,
        req: JoinCallRequest,
    ) -> Result<JoinCallResponse, Traced<CoordinatorError>>;

    /// Accepts an incoming call.
    async fn accept_call(
        &self,
        call_type: String,
        call_id: String,
    ) -> Result<(), Traced<CoordinatorError>>;

    /// Rejects an incoming call.
    async fn reject_call(
        &self,
        call_type: String,
        call_id: String,
    ) -> Result<(), Traced<CoordinatorError>>;
}
