//! Local media controls of a media session: mute states, screen sharing,
//! camera switching and the preferences of the received video.

use std::sync::Arc;

use tandem_sfu_proto::{TrackMuteState, TrackType, VideoDimension};
use tracerr::Traced;

use crate::{
    call::state::{CallState, IncomingVideoPolicy},
    platform::{CameraPosition, MediaStreamTrack},
};

use super::{
    lock, publisher, subscriptions, Inner, MediaSession, SessionError,
};

impl MediaSession {
    /// Unmutes or mutes the microphone.
    ///
    /// # Errors
    ///
    /// With [`SessionError::Forbidden`] when unmuting without the permission
    /// to send audio, or if the microphone cannot be captured.
    pub async fn set_audio_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), Traced<SessionError>> {
        set_enabled(&self.0, TrackType::Audio, enabled).await
    }

    /// Unmutes or mutes the camera.
    ///
    /// # Errors
    ///
    /// With [`SessionError::Forbidden`] when unmuting without the permission
    /// to send video, or if the camera cannot be captured.
    pub async fn set_video_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), Traced<SessionError>> {
        set_enabled(&self.0, TrackType::Video, enabled).await
    }

    /// Starts sharing the screen.
    ///
    /// # Errors
    ///
    /// With [`SessionError::Forbidden`] without the permission to share the
    /// screen, or if the screen cannot be captured.
    pub async fn start_screenshare(&self) -> Result<(), Traced<SessionError>> {
        set_enabled(&self.0, TrackType::ScreenShare, true).await
    }

    /// Stops sharing the screen, releasing the capture.
    pub fn stop_screenshare(&self) {
        let inner = &self.0;
        if !publisher::unpublish(inner, TrackType::ScreenShare) {
            log::debug!("Screen share was not published");
        }
        inner.media.release(TrackType::ScreenShare);
        update_mute_state(inner, TrackType::ScreenShare, true);
    }

    /// Switches the camera to the provided [`CameraPosition`].
    ///
    /// The published video keeps flowing: the new track replaces the old one
    /// on the same transceiver, and only then the old one is stopped.
    ///
    /// # Errors
    ///
    /// If the new camera cannot be captured, in which case nothing changes.
    pub async fn change_camera_position(
        &self,
        position: CameraPosition,
    ) -> Result<(), Traced<SessionError>> {
        let inner = &self.0;
        if inner.media.camera_position() == position {
            return Ok(());
        }
        let (track, old) = inner
            .media
            .switch_camera(position)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
        let res = if is_publishing(inner, TrackType::Video) {
            publisher::publish(inner, TrackType::Video, track)
        } else {
            Ok(())
        };
        if let Some(old) = old {
            old.stop();
        }
        res
    }

    /// Sets whether the video of the provided participant is wanted,
    /// updating the subscriptions if it changes.
    ///
    /// # Errors
    ///
    /// If the call store is closed.
    pub async fn set_track_visibility(
        &self,
        session_id: &str,
        visible: bool,
    ) -> Result<(), Traced<SessionError>> {
        let session_id = session_id.to_owned();
        self.update_subscription_state(move |s| {
            s.set_track_visibility(&session_id, visible)
        })
        .await
    }

    /// Sets the size the video of the provided participant is rendered at,
    /// updating the subscriptions if it changes.
    ///
    /// # Errors
    ///
    /// If the call store is closed.
    pub async fn update_track_size(
        &self,
        session_id: &str,
        size: VideoDimension,
    ) -> Result<(), Traced<SessionError>> {
        let session_id = session_id.to_owned();
        self.update_subscription_state(move |s| {
            s.set_track_size(&session_id, size)
        })
        .await
    }

    /// Sets the [`IncomingVideoPolicy`], updating the subscriptions if it
    /// changes.
    ///
    /// # Errors
    ///
    /// If the call store is closed.
    pub async fn set_incoming_video_policy(
        &self,
        policy: IncomingVideoPolicy,
    ) -> Result<(), Traced<SessionError>> {
        self.update_subscription_state(move |s| {
            let changed = s.incoming_video_policy != policy;
            s.incoming_video_policy = policy;
            changed
        })
        .await
    }

    async fn update_subscription_state<F>(
        &self,
        f: F,
    ) -> Result<(), Traced<SessionError>>
    where
        F: FnOnce(&mut CallState) -> bool + Send + 'static,
    {
        let changed = self
            .0
            .store
            .update(f)
            .await
            .map_err(|e| tracerr::new!(SessionError::from(e)))?;
        if changed {
            subscriptions::refresh(&self.0);
        }
        Ok(())
    }
}

fn is_publishing(inner: &Inner, track_type: TrackType) -> bool {
    inner
        .publisher()
        .map_or(false, |p| p.is_publishing(track_type))
}

/// Enables or disables the local track of the provided [`TrackType`].
///
/// The track is toggled locally right away, and then the SFU is informed.
async fn set_enabled(
    inner: &Arc<Inner>,
    track_type: TrackType,
    enabled: bool,
) -> Result<(), Traced<SessionError>> {
    if enabled {
        if let Some(capability) = publisher::required_capability(track_type) {
            if !inner.has_capability(capability) {
                return Err(tracerr::new!(SessionError::Forbidden(capability)));
            }
        }
    }

    let track: Arc<dyn MediaStreamTrack> = if enabled {
        inner
            .media
            .get_or_create(track_type)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?
    } else {
        match inner.media.track(track_type) {
            Some(track) => track,
            None => return Ok(()),
        }
    };
    track.set_enabled(enabled);

    if enabled
        && inner.current_link().is_some()
        && !is_publishing(inner, track_type)
    {
        publisher::publish(inner, track_type, track)?;
    }
    update_mute_state(inner, track_type, !enabled);
    Ok(())
}

/// Records the desired mute state of the provided [`TrackType`] and informs
/// the SFU about it.
///
/// Retries stop once the desired state changes again or the link is
/// replaced.
fn update_mute_state(inner: &Arc<Inner>, track_type: TrackType, muted: bool) {
    let _ = lock(&inner.mute_states).insert(track_type, muted);
    let link = match inner.current_link() {
        Some(link) => link,
        None => return,
    };

    let inner = Arc::clone(inner);
    inner.scope.clone().spawn(async move {
        let is_desired = || {
            lock(&inner.mute_states).get(&track_type) == Some(&muted)
        };
        let res = link
            .signal
            .update_mute_states(
                vec![TrackMuteState { track_type, muted }],
                || is_desired() && !link.is_closed(),
            )
            .await;
        if let Err(e) = res {
            if is_desired() {
                log::error!(
                    "Failed to update {} mute state: {}",
                    track_type,
                    e,
                );
            } else {
                log::debug!(
                    "Outdated {} mute state dropped: {}",
                    track_type,
                    e,
                );
            }
        }
    });
}
