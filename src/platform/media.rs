//! Local and remote media tracks.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use derive_more::Display;
use tracerr::Traced;

/// Kind of a [`MediaStreamTrack`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Position of a camera capturing a local video track.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    /// Returns the opposite [`CameraPosition`].
    #[inline]
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl Default for CameraPosition {
    #[inline]
    fn default() -> Self {
        Self::Front
    }
}

/// Media track produced locally or received from the SFU.
pub trait MediaStreamTrack: fmt::Debug + Send + Sync {
    /// Unique ID of this track.
    fn id(&self) -> String;

    /// [`MediaKind`] of this track.
    fn kind(&self) -> MediaKind;

    /// Indicates whether this track currently produces media.
    fn is_enabled(&self) -> bool;

    /// Enables or disables media production of this track.
    fn set_enabled(&self, enabled: bool);

    /// Stops this track, releasing the underlying device.
    fn stop(&self);
}

/// Errors of a [`MediaSource`].
#[derive(Clone, Debug, Display)]
pub enum MediaSourceError {
    /// Access to the capturing device has been denied.
    #[display(fmt = "Access to {} device denied", _0)]
    AccessDenied(MediaKind),

    /// Capturing has failed.
    #[display(fmt = "Failed to capture media: {}", _0)]
    CaptureFailed(String),
}

/// Producer of local media tracks (microphone, camera, screen capture).
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Creates a new microphone track.
    async fn create_audio_track(
        &self,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>>;

    /// Creates a new camera track capturing from the provided
    /// [`CameraPosition`].
    async fn create_video_track(
        &self,
        position: CameraPosition,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>>;

    /// Creates a new screen capture track.
    async fn create_screenshare_track(
        &self,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>>;
}
