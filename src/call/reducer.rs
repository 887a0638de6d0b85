//! Application of the SFU events to a [`CallState`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tandem_sfu_proto::{
    AudioLevel, CallEndedReason, CallGrants, CallState as SfuCallState,
    ConnectionQualityInfo, GoAwayReason, IceServer, IceTrickle,
    ParticipantCount, Participant, PeerType, Pin, ReconnectStrategy, SfuError,
    SfuEvent, SfuEventHandler, TrackType, VideoSender,
};

use super::state::{
    CallParticipant, CallState, PinKind, PinState, RECORDING_BOT_USER_ID,
};

/// Notification about a participant joining or leaving a call.
#[derive(Clone, Debug, PartialEq)]
pub enum ParticipantEvent {
    Joined(CallParticipant),
    Left(CallParticipant),
}

/// Outcome of applying a single [`SfuEvent`].
#[derive(Debug, Default)]
pub struct Reduction {
    /// Indicates whether the [`CallState`] has been mutated.
    pub changed: bool,

    pub notifications: Vec<ParticipantEvent>,
}

/// Applies the provided [`SfuEvent`] to the provided [`CallState`].
///
/// Events not affecting the participants' state are ignored.
pub fn reduce(
    state: &mut CallState,
    participants_threshold: usize,
    event: SfuEvent,
) -> Reduction {
    let mut reducer = Reducer {
        state,
        participants_threshold,
        changed: false,
        notifications: Vec::new(),
        now: Utc::now(),
    };
    event.dispatch_with(&mut reducer);
    Reduction {
        changed: reducer.changed,
        notifications: reducer.notifications,
    }
}

/// [`SfuEventHandler`] mutating a [`CallState`].
struct Reducer<'a> {
    state: &'a mut CallState,

    /// Number of participants starting from which new participants' tracks
    /// are not shown by default.
    participants_threshold: usize,

    changed: bool,

    notifications: Vec<ParticipantEvent>,

    now: DateTime<Utc>,
}

impl Reducer<'_> {
    /// Mutates the participant of the provided session, if it's known.
    fn update_participant<F>(&mut self, session_id: &str, f: F)
    where
        F: FnOnce(&mut CallParticipant),
    {
        if let Some(p) = self.state.participants.get_mut(session_id) {
            let before = p.clone();
            f(p);
            self.changed |= *p != before;
        }
    }

    /// Sets or clears the server pins, never touching the local ones.
    fn apply_server_pins(&mut self, pins: &[Pin]) {
        let now = self.now;
        for p in self.state.participants.values_mut() {
            if p.is_pinned_locally() {
                continue;
            }
            let pinned = pins.iter().any(|pin| pin.session_id == p.session_id);
            match (pinned, p.pin) {
                (true, None) => {
                    p.pin = Some(PinState {
                        kind: PinKind::Server,
                        pinned_at: now,
                    });
                    self.changed = true;
                }
                (false, Some(PinState { kind: PinKind::Server, .. })) => {
                    p.pin = None;
                    self.changed = true;
                }
                _ => {}
            }
        }
    }
}

impl SfuEventHandler for Reducer<'_> {
    fn on_subscriber_offer(&mut self, _: String, _: bool) {}

    fn on_publisher_answer(&mut self, _: String) {}

    fn on_connection_quality_changed(
        &mut self,
        connection_quality_updates: Vec<ConnectionQualityInfo>,
    ) {
        for update in connection_quality_updates {
            let quality = update.connection_quality;
            self.update_participant(&update.session_id, |p| {
                p.connection_quality = quality;
            });
        }
    }

    fn on_audio_level_changed(&mut self, audio_levels: Vec<AudioLevel>) {
        for level in audio_levels {
            let p = match self.state.participants.get_mut(&level.session_id) {
                Some(p) => p,
                None => continue,
            };
            if p.is_speaking == level.is_speaking && !level.is_speaking {
                continue;
            }
            #[allow(clippy::float_cmp)]
            let level_changed = p.audio_level != level.level;
            if p.is_speaking != level.is_speaking || level_changed {
                p.is_speaking = level.is_speaking;
                p.audio_level = level.level;
                self.changed = true;
            }
        }
    }

    fn on_ice_trickle(&mut self, _: IceTrickle) {}

    fn on_change_publish_quality(&mut self, _: Vec<VideoSender>) {}

    fn on_participant_joined(&mut self, _: String, participant: Participant) {
        if participant.user_id == RECORDING_BOT_USER_ID {
            return;
        }
        if self.state.participants.contains_key(&participant.session_id) {
            let session_id = participant.session_id.clone();
            self.update_participant(&session_id, |p| {
                p.merge_from_sfu(participant);
            });
            return;
        }

        let show_track =
            self.state.participants.len() < self.participants_threshold;
        let mut joined = CallParticipant::from_sfu(participant, show_track);
        self.state.attach_registered_tracks(&mut joined);
        drop(
            self.state
                .participants
                .insert(joined.session_id.clone(), joined.clone()),
        );
        self.changed = true;
        self.notifications.push(ParticipantEvent::Joined(joined));
    }

    fn on_participant_left(&mut self, _: String, participant: Participant) {
        if let Some(mut left) =
            self.state.participants.remove(&participant.session_id)
        {
            self.state.release_tracks(&mut left);
            self.changed = true;
            self.notifications.push(ParticipantEvent::Left(left));
        }
    }

    fn on_participant_updated(&mut self, _: String, participant: Participant) {
        let session_id = participant.session_id.clone();
        self.update_participant(&session_id, |p| {
            p.merge_from_sfu(participant);
        });
    }

    fn on_dominant_speaker_changed(&mut self, _: String, session_id: String) {
        for p in self.state.participants.values_mut() {
            let is_dominant = p.session_id == session_id;
            if p.is_dominant_speaker != is_dominant {
                p.is_dominant_speaker = is_dominant;
                self.changed = true;
            }
        }
    }

    fn on_join_response(
        &mut self,
        call_state: SfuCallState,
        _: bool,
        _: u32,
        _: Vec<IceServer>,
    ) {
        let show_track =
            call_state.participants.len() < self.participants_threshold;
        let mut previous = std::mem::take(&mut self.state.participants);

        let mut participants = HashMap::new();
        for sfu_participant in call_state.participants {
            if sfu_participant.user_id == RECORDING_BOT_USER_ID {
                continue;
            }
            let participant =
                match previous.remove(&sfu_participant.session_id) {
                    Some(mut existing) => {
                        existing.merge_from_sfu(sfu_participant);
                        existing
                    }
                    None => {
                        let mut p = CallParticipant::from_sfu(
                            sfu_participant,
                            show_track,
                        );
                        self.state.attach_registered_tracks(&mut p);
                        self.notifications
                            .push(ParticipantEvent::Joined(p.clone()));
                        p
                    }
                };
            let session_id = participant.session_id.clone();
            drop(participants.insert(session_id, participant));
        }
        for (_, mut gone) in previous {
            self.state.release_tracks(&mut gone);
            self.notifications.push(ParticipantEvent::Left(gone));
        }

        self.state.participants = participants;
        self.state.participant_count = call_state.participant_count.total;
        self.state.anonymous_participant_count =
            call_state.participant_count.anonymous;
        self.state.started_at = call_state.started_at;
        self.apply_server_pins(&call_state.pins);
        self.state.is_initialized = true;
        self.changed = true;
    }

    fn on_health_check_response(
        &mut self,
        participant_count: ParticipantCount,
    ) {
        let (total, anonymous) =
            (participant_count.total, participant_count.anonymous);
        if self.state.participant_count != total
            || self.state.anonymous_participant_count != anonymous
        {
            self.state.participant_count = total;
            self.state.anonymous_participant_count = anonymous;
            self.changed = true;
        }
    }

    fn on_track_published(
        &mut self,
        _: String,
        session_id: String,
        track_type: TrackType,
        participant: Option<Participant>,
    ) {
        self.update_participant(&session_id, |p| {
            if let Some(update) = participant {
                p.merge_from_sfu(update);
            }
            p.set_track_published(track_type, true);
        });
    }

    fn on_track_unpublished(
        &mut self,
        _: String,
        session_id: String,
        track_type: TrackType,
        participant: Option<Participant>,
    ) {
        self.update_participant(&session_id, |p| {
            if let Some(update) = participant {
                p.merge_from_sfu(update);
            }
            p.set_track_published(track_type, false);
        });
    }

    fn on_error(&mut self, _: SfuError, _: ReconnectStrategy) {}

    fn on_call_grants_updated(&mut self, current_grants: CallGrants) {
        let before = self.state.own_capabilities.clone();
        self.state.apply_grants(current_grants);
        self.changed |= self.state.own_capabilities != before;
    }

    fn on_go_away(&mut self, _: GoAwayReason) {}

    fn on_ice_restart(&mut self, _: PeerType) {}

    fn on_pins_changed(&mut self, pins: Vec<Pin>) {
        self.apply_server_pins(&pins);
    }

    fn on_call_ended(&mut self, _: CallEndedReason) {
        if self.state.ended_at.is_none() {
            self.state.ended_at = Some(self.now);
            self.changed = true;
        }
    }

    fn on_participant_migration_complete(&mut self) {}
}
