//! Snapshot of a call and its participants.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use derive_more::Display;
use tandem_sfu_proto::{
    CallGrants, ConnectionQuality, Participant, TrackType, VideoDimension,
};

use crate::{
    coordinator::{
        CallResponse, CallSessionResponse, CallSettings, CoordinatorEvent,
        EgressResponse, MemberResponse, OwnCapability, UserResponse,
    },
    platform::MediaStreamTrack,
};

/// User ID of the recording bot, never shown as a participant.
pub const RECORDING_BOT_USER_ID: &str = "recording-egress";

/// Handle to a remote track, compared by its ID.
#[derive(Clone)]
pub struct TrackHandle(pub Arc<dyn MediaStreamTrack>);

impl fmt::Debug for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackHandle").field(&self.0.id()).finish()
    }
}

impl PartialEq for TrackHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

/// Origin of a pin.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PinKind {
    /// Pinned by the local user, visible only locally.
    Local,

    /// Pinned for everyone by the server.
    Server,
}

/// Pin of a participant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PinState {
    pub kind: PinKind,
    pub pinned_at: DateTime<Utc>,
}

/// Status of the media session connection as seen by the application.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ReconnectionStatus {
    Connected,
    Reconnecting,
    Migrating,
    Disconnected,
}

impl Default for ReconnectionStatus {
    #[inline]
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Policy of receiving remote video.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncomingVideoPolicy {
    /// Video is received at the size each participant is rendered at.
    Auto,

    /// Video is received at the provided size regardless of the rendering.
    Manual { target: VideoDimension },

    /// No video is received.
    Disabled,
}

impl Default for IncomingVideoPolicy {
    #[inline]
    fn default() -> Self {
        Self::Auto
    }
}

/// Participant of a call, one per joined session.
#[derive(Clone, Debug, PartialEq)]
pub struct CallParticipant {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub image: String,
    pub roles: Vec<String>,
    pub joined_at: Option<String>,

    /// Prefix of the IDs of the remote streams of this participant.
    pub track_lookup_prefix: String,

    pub has_audio: bool,
    pub has_video: bool,
    pub is_screensharing: bool,

    pub audio_track: Option<TrackHandle>,
    pub video_track: Option<TrackHandle>,
    pub screenshare_track: Option<TrackHandle>,

    pub connection_quality: ConnectionQuality,
    pub is_speaking: bool,
    pub is_dominant_speaker: bool,
    pub audio_level: f32,

    pub pin: Option<PinState>,

    /// Size this participant's video is rendered at.
    pub track_size: VideoDimension,

    /// Indicates whether this participant's video is wanted by the UI.
    pub show_track: bool,
}

impl CallParticipant {
    /// Builds a new [`CallParticipant`] out of the SFU [`Participant`]
    /// record.
    #[must_use]
    pub fn from_sfu(p: Participant, show_track: bool) -> Self {
        let mut participant = Self {
            session_id: p.session_id.clone(),
            user_id: String::new(),
            name: String::new(),
            image: String::new(),
            roles: Vec::new(),
            joined_at: None,
            track_lookup_prefix: String::new(),
            has_audio: false,
            has_video: false,
            is_screensharing: false,
            audio_track: None,
            video_track: None,
            screenshare_track: None,
            connection_quality: ConnectionQuality::default(),
            is_speaking: false,
            is_dominant_speaker: false,
            audio_level: 0.0,
            pin: None,
            track_size: VideoDimension::default(),
            show_track,
        };
        participant.merge_from_sfu(p);
        participant
    }

    /// Updates this [`CallParticipant`] with the SFU [`Participant`] record,
    /// keeping the locally managed fields (tracks, pin, visibility, size).
    pub fn merge_from_sfu(&mut self, p: Participant) {
        self.has_audio = p.published_tracks.contains(&TrackType::Audio);
        self.has_video = p.published_tracks.contains(&TrackType::Video);
        self.is_screensharing =
            p.published_tracks.contains(&TrackType::ScreenShare);
        self.user_id = p.user_id;
        self.session_id = p.session_id;
        self.name = p.name;
        self.image = p.image;
        self.roles = p.roles;
        self.joined_at = p.joined_at;
        self.track_lookup_prefix = p.track_lookup_prefix;
        self.connection_quality = p.connection_quality;
        self.is_speaking = p.is_speaking;
        self.is_dominant_speaker = p.is_dominant_speaker;
        self.audio_level = p.audio_level;
    }

    /// Sets whether a track of the provided [`TrackType`] is published.
    pub fn set_track_published(
        &mut self,
        track_type: TrackType,
        published: bool,
    ) {
        match track_type {
            TrackType::Audio => self.has_audio = published,
            TrackType::Video => self.has_video = published,
            TrackType::ScreenShare => {
                self.is_screensharing = published;
                if !published {
                    self.screenshare_track = None;
                }
            }
            TrackType::ScreenShareAudio => {}
        }
    }

    /// Sets the handle of the track of the provided [`TrackType`].
    pub fn set_track(
        &mut self,
        track_type: TrackType,
        track: Option<TrackHandle>,
    ) {
        match track_type {
            TrackType::Audio => self.audio_track = track,
            TrackType::Video => self.video_track = track,
            TrackType::ScreenShare => self.screenshare_track = track,
            TrackType::ScreenShareAudio => {}
        }
    }

    /// Indicates whether this participant is pinned locally.
    #[inline]
    #[must_use]
    pub fn is_pinned_locally(&self) -> bool {
        matches!(self.pin, Some(PinState { kind: PinKind::Local, .. }))
    }
}

/// Authoritative snapshot of a call.
///
/// Only the call store mutates it, everything else reads its snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct CallState {
    pub call_type: String,
    pub call_id: String,

    /// ID of the local session on the SFU.
    pub session_id: String,

    /// Indicates whether the SFU has enumerated the participants.
    pub is_initialized: bool,

    /// Participants by their session IDs.
    pub participants: HashMap<String, CallParticipant>,
    pub participant_count: u32,
    pub anonymous_participant_count: u32,
    pub started_at: Option<String>,

    pub members: Vec<MemberResponse>,
    pub own_capabilities: HashSet<OwnCapability>,

    pub custom: serde_json::Map<String, serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub backstage: bool,
    pub recording: bool,
    pub transcribing: bool,
    pub blocked_user_ids: Vec<String>,
    pub settings: CallSettings,
    pub session: Option<CallSessionResponse>,
    pub egress: EgressResponse,
    pub created_by: Option<UserResponse>,
    pub team: Option<String>,

    pub reconnection_status: ReconnectionStatus,
    pub incoming_video_policy: IncomingVideoPolicy,

    /// Registry of the received remote tracks by the track lookup prefixes
    /// of their participants.
    pub remote_tracks: HashMap<String, HashMap<TrackType, TrackHandle>>,
}

impl CallState {
    /// Creates a new empty [`CallState`] of the provided call.
    #[must_use]
    pub fn new(call_type: &str, call_id: &str) -> Self {
        Self {
            call_type: call_type.to_owned(),
            call_id: call_id.to_owned(),
            session_id: String::new(),
            is_initialized: false,
            participants: HashMap::new(),
            participant_count: 0,
            anonymous_participant_count: 0,
            started_at: None,
            members: Vec::new(),
            own_capabilities: HashSet::new(),
            custom: serde_json::Map::new(),
            created_at: None,
            updated_at: None,
            starts_at: None,
            ended_at: None,
            backstage: false,
            recording: false,
            transcribing: false,
            blocked_user_ids: Vec::new(),
            settings: CallSettings::default(),
            session: None,
            egress: EgressResponse::default(),
            created_by: None,
            team: None,
            reconnection_status: ReconnectionStatus::default(),
            incoming_video_policy: IncomingVideoPolicy::default(),
            remote_tracks: HashMap::new(),
        }
    }

    /// Composite ID of the call.
    #[must_use]
    pub fn cid(&self) -> String {
        format!("{}:{}", self.call_type, self.call_id)
    }

    /// Returns the local participant, if joined.
    #[must_use]
    pub fn local_participant(&self) -> Option<&CallParticipant> {
        self.participants.get(&self.session_id)
    }

    /// Returns all the participants except the local one, ordered by their
    /// session IDs.
    #[must_use]
    pub fn remote_participants(&self) -> Vec<&CallParticipant> {
        let mut remote: Vec<_> = self
            .participants
            .values()
            .filter(|p| p.session_id != self.session_id)
            .collect();
        remote.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        remote
    }

    /// Returns the current dominant speaker, if any.
    #[must_use]
    pub fn dominant_speaker(&self) -> Option<&CallParticipant> {
        self.participants.values().find(|p| p.is_dominant_speaker)
    }

    /// Indicates whether the local user has the provided [`OwnCapability`].
    #[inline]
    #[must_use]
    pub fn has_capability(&self, capability: OwnCapability) -> bool {
        self.own_capabilities.contains(&capability)
    }

    /// Applies the call metadata returned by the coordinator.
    pub fn update_from(&mut self, call: &CallResponse) {
        self.custom = call.custom.clone();
        self.created_at = Some(call.created_at);
        self.updated_at = Some(call.updated_at);
        self.starts_at = call.starts_at;
        self.ended_at = call.ended_at;
        self.backstage = call.backstage;
        self.recording = call.recording;
        self.transcribing = call.transcribing;
        self.blocked_user_ids = call.blocked_user_ids.clone();
        self.settings = call.settings.clone();
        self.session = call.session.clone();
        self.egress = call.egress.clone();
        self.created_by = Some(call.created_by.clone());
        self.team = call.team.clone();
    }

    /// Merges the provided members into the member list.
    ///
    /// Known members are replaced only if their `updated_at` has changed.
    pub fn merge_members(&mut self, members: Vec<MemberResponse>) {
        for member in members {
            match self.members.iter_mut().find(|m| m.user_id == member.user_id)
            {
                Some(existing) => {
                    if existing.updated_at != member.updated_at {
                        *existing = member;
                    }
                }
                None => self.members.push(member),
            }
        }
    }

    /// Replaces the own capabilities.
    pub fn set_own_capabilities<I>(&mut self, capabilities: I)
    where
        I: IntoIterator<Item = OwnCapability>,
    {
        self.own_capabilities = capabilities.into_iter().collect();
    }

    /// Updates the publishing capabilities from the provided [`CallGrants`],
    /// keeping the rest of them.
    pub fn apply_grants(&mut self, grants: CallGrants) {
        for (capability, granted) in &[
            (OwnCapability::SendAudio, grants.can_publish_audio),
            (OwnCapability::SendVideo, grants.can_publish_video),
            (OwnCapability::Screenshare, grants.can_screenshare),
        ] {
            if *granted {
                let _ = self.own_capabilities.insert(*capability);
            } else {
                let _ = self.own_capabilities.remove(capability);
            }
        }
    }

    /// Applies the provided [`CoordinatorEvent`].
    pub fn apply_coordinator_event(&mut self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::BlockedUser { user_id } => {
                if !self.blocked_user_ids.contains(user_id) {
                    self.blocked_user_ids.push(user_id.clone());
                }
            }
            CoordinatorEvent::UnblockedUser { user_id } => {
                self.blocked_user_ids.retain(|id| id != user_id);
            }
            CoordinatorEvent::CallAccepted { user_id, at } => {
                let _ = self
                    .session
                    .get_or_insert_with(CallSessionResponse::default)
                    .accepted_by
                    .insert(user_id.clone(), *at);
            }
            CoordinatorEvent::CallRejected { user_id, at } => {
                let _ = self
                    .session
                    .get_or_insert_with(CallSessionResponse::default)
                    .rejected_by
                    .insert(user_id.clone(), *at);
            }
            CoordinatorEvent::RecordingStarted => self.recording = true,
            CoordinatorEvent::RecordingStopped => self.recording = false,
            CoordinatorEvent::TranscriptionStarted => self.transcribing = true,
            CoordinatorEvent::TranscriptionStopped => {
                self.transcribing = false;
            }
            CoordinatorEvent::CallUpdated(call) => self.update_from(call),
            CoordinatorEvent::CallEnded { at } => self.ended_at = Some(*at),
        }
    }

    /// Registers the provided remote track and attaches it to its
    /// participant, if known.
    pub fn attach_track(
        &mut self,
        lookup_prefix: &str,
        track_type: TrackType,
        track: TrackHandle,
    ) {
        drop(
            self.remote_tracks
                .entry(lookup_prefix.to_owned())
                .or_default()
                .insert(track_type, track.clone()),
        );
        if let Some(p) = self
            .participants
            .values_mut()
            .find(|p| p.track_lookup_prefix == lookup_prefix)
        {
            p.set_track(track_type, Some(track));
        }
    }

    /// Unregisters the remote track and detaches it from its participant.
    pub fn detach_track(&mut self, lookup_prefix: &str, track_type: TrackType) {
        if let Some(tracks) = self.remote_tracks.get_mut(lookup_prefix) {
            drop(tracks.remove(&track_type));
        }
        if let Some(p) = self
            .participants
            .values_mut()
            .find(|p| p.track_lookup_prefix == lookup_prefix)
        {
            p.set_track(track_type, None);
        }
    }

    /// Unregisters all the remote tracks of the provided participant.
    pub fn release_tracks(&mut self, participant: &mut CallParticipant) {
        drop(self.remote_tracks.remove(&participant.track_lookup_prefix));
        participant.audio_track = None;
        participant.video_track = None;
        participant.screenshare_track = None;
    }

    /// Attaches the registered remote tracks to the provided participant.
    pub fn attach_registered_tracks(&self, participant: &mut CallParticipant) {
        let prefix = &participant.track_lookup_prefix;
        if let Some(tracks) = self.remote_tracks.get(prefix).cloned() {
            for (track_type, track) in tracks {
                participant.set_track(track_type, Some(track));
            }
        }
    }

    /// Pins the provided participant locally.
    ///
    /// Returns `false` if there is no such participant.
    pub fn pin(&mut self, session_id: &str, at: DateTime<Utc>) -> bool {
        match self.participants.get_mut(session_id) {
            Some(p) => {
                p.pin = Some(PinState {
                    kind: PinKind::Local,
                    pinned_at: at,
                });
                true
            }
            None => false,
        }
    }

    /// Removes the pin of the provided participant.
    ///
    /// Returns `false` if there is no such participant.
    pub fn unpin(&mut self, session_id: &str) -> bool {
        match self.participants.get_mut(session_id) {
            Some(p) => {
                p.pin = None;
                true
            }
            None => false,
        }
    }

    /// Sets whether the video of the provided participant is wanted.
    ///
    /// Returns `false` if there is no such participant or nothing changed.
    pub fn set_track_visibility(
        &mut self,
        session_id: &str,
        visible: bool,
    ) -> bool {
        match self.participants.get_mut(session_id) {
            Some(p) if p.show_track != visible => {
                p.show_track = visible;
                true
            }
            _ => false,
        }
    }

    /// Sets the size the video of the provided participant is rendered at.
    ///
    /// Returns `false` if there is no such participant or nothing changed.
    pub fn set_track_size(
        &mut self,
        session_id: &str,
        size: VideoDimension,
    ) -> bool {
        match self.participants.get_mut(session_id) {
            Some(p) if p.track_size != size => {
                p.track_size = size;
                true
            }
            _ => false,
        }
    }
}
