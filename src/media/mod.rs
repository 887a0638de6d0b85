//! Local media tracks of a call session.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tandem_sfu_proto::TrackType;
use tracerr::Traced;

use crate::platform::{
    CameraPosition, MediaSource, MediaSourceError, MediaStreamTrack,
};

/// Local tracks of a call session, by their [`TrackType`].
///
/// Tracks outlive peer connections: they're kept across reconnections and
/// migrations, and only released on [`LocalMedia::stop_all`].
pub struct LocalMedia {
    source: Arc<dyn MediaSource>,
    tracks: Mutex<HashMap<TrackType, Arc<dyn MediaStreamTrack>>>,
    camera_position: Mutex<CameraPosition>,
}

impl LocalMedia {
    /// Creates a new [`LocalMedia`] without any tracks.
    #[must_use]
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            tracks: Mutex::new(HashMap::new()),
            camera_position: Mutex::new(CameraPosition::default()),
        }
    }

    /// Returns the track of the provided [`TrackType`], if any.
    #[must_use]
    pub fn track(
        &self,
        track_type: TrackType,
    ) -> Option<Arc<dyn MediaStreamTrack>> {
        lock(&self.tracks).get(&track_type).cloned()
    }

    /// Returns the track of the provided [`TrackType`], creating it if there
    /// is none.
    ///
    /// New tracks are created enabled. [`TrackType::ScreenShareAudio`] has no
    /// source of its own and always fails.
    ///
    /// # Errors
    ///
    /// With [`MediaSourceError`] if the track cannot be created.
    pub async fn get_or_create(
        &self,
        track_type: TrackType,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
        if let Some(track) = self.track(track_type) {
            return Ok(track);
        }
        let track = match track_type {
            TrackType::Audio => self.source.create_audio_track().await,
            TrackType::Video => {
                let position = *lock(&self.camera_position);
                self.source.create_video_track(position).await
            }
            TrackType::ScreenShare => {
                self.source.create_screenshare_track().await
            }
            TrackType::ScreenShareAudio => {
                return Err(tracerr::new!(MediaSourceError::CaptureFailed(
                    "screen share audio has no source".into()
                )));
            }
        }
        .map_err(tracerr::wrap!())?;

        // Another caller may have created it concurrently.
        let mut tracks = lock(&self.tracks);
        if let Some(existing) = tracks.get(&track_type) {
            track.stop();
            return Ok(Arc::clone(existing));
        }
        drop(tracks.insert(track_type, Arc::clone(&track)));
        Ok(track)
    }

    /// Removes and stops the track of the provided [`TrackType`].
    pub fn release(&self, track_type: TrackType) {
        if let Some(track) = lock(&self.tracks).remove(&track_type) {
            track.stop();
        }
    }

    /// Current [`CameraPosition`].
    #[must_use]
    pub fn camera_position(&self) -> CameraPosition {
        *lock(&self.camera_position)
    }

    /// Captures a new camera track from the provided [`CameraPosition`],
    /// replacing the current one.
    ///
    /// Returns the new track and the replaced one, the latter is left
    /// running so that the caller can stop it once the new one is sent.
    ///
    /// # Errors
    ///
    /// With [`MediaSourceError`] if the new track cannot be created, in which
    /// case nothing is changed.
    pub async fn switch_camera(
        &self,
        position: CameraPosition,
    ) -> Result<
        (Arc<dyn MediaStreamTrack>, Option<Arc<dyn MediaStreamTrack>>),
        Traced<MediaSourceError>,
    > {
        let track = self
            .source
            .create_video_track(position)
            .await
            .map_err(tracerr::wrap!())?;
        let enabled = self
            .track(TrackType::Video)
            .map_or(true, |t| t.is_enabled());
        track.set_enabled(enabled);

        *lock(&self.camera_position) = position;
        let old =
            lock(&self.tracks).insert(TrackType::Video, Arc::clone(&track));
        Ok((track, old))
    }

    /// Stops and removes all the tracks.
    pub fn stop_all(&self) {
        for (_, track) in lock(&self.tracks).drain() {
            track.stop();
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod spec {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use tandem_sfu_proto::TrackType;
    use tracerr::Traced;

    use crate::platform::{
        CameraPosition, MediaKind, MediaSource, MediaSourceError,
        MediaStreamTrack,
    };

    use super::LocalMedia;

    #[derive(Debug)]
    struct Track {
        id: String,
        kind: MediaKind,
        enabled: AtomicBool,
        stopped: AtomicBool,
    }

    impl MediaStreamTrack for Track {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn kind(&self) -> MediaKind {
            self.kind
        }

        fn is_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn set_enabled(&self, enabled: bool) {
            self.enabled.store(enabled, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Source(AtomicUsize);

    impl Source {
        fn track(
            &self,
            kind: MediaKind,
            name: &str,
        ) -> Arc<dyn MediaStreamTrack> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Arc::new(Track {
                id: format!("{}-{}", name, n),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl MediaSource for Source {
        async fn create_audio_track(
            &self,
        ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
            Ok(self.track(MediaKind::Audio, "mic"))
        }

        async fn create_video_track(
            &self,
            position: CameraPosition,
        ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
            Ok(self.track(MediaKind::Video, &position.to_string()))
        }

        async fn create_screenshare_track(
            &self,
        ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
            Ok(self.track(MediaKind::Video, "screen"))
        }
    }

    #[tokio::test]
    async fn creates_tracks_once() {
        let media = LocalMedia::new(Arc::new(Source::default()));

        let first = media.get_or_create(TrackType::Audio).await.unwrap();
        let second = media.get_or_create(TrackType::Audio).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert!(media.track(TrackType::Video).is_none());
    }

    #[tokio::test]
    async fn switching_camera_keeps_enabled_flag() {
        let media = LocalMedia::new(Arc::new(Source::default()));
        let front = media.get_or_create(TrackType::Video).await.unwrap();
        front.set_enabled(false);

        let (back, old) = media
            .switch_camera(media.camera_position().flipped())
            .await
            .unwrap();

        assert_eq!(old.unwrap().id(), front.id());
        assert!(back.id().starts_with("Back"));
        assert!(!back.is_enabled());
        assert_eq!(media.camera_position(), CameraPosition::Back);
    }

    #[tokio::test]
    async fn screen_share_audio_has_no_source() {
        let media = LocalMedia::new(Arc::new(Source::default()));

        media
            .get_or_create(TrackType::ScreenShareAudio)
            .await
            .unwrap_err();
    }
}
