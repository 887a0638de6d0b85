//! Calls: their lifecycle, their state and the media session keeping it.

mod lifecycle;
pub mod reducer;
pub mod state;
pub mod store;

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use chrono::Utc;
use futures::stream::{BoxStream, StreamExt as _};
use tandem_sfu_proto::VideoDimension;
use tracerr::Traced;

use crate::{
    client::Context,
    conf::{Conf, RetryPolicy},
    coordinator::{CallResponse, CoordinatorEvent},
    media::LocalMedia,
    platform::CameraPosition,
    session::{MediaSession, SessionEvent, SessionState},
    utils::{retry, TaskScope},
};

use self::{
    lifecycle::Lifecycle,
    reducer::ParticipantEvent,
    state::{CallState, IncomingVideoPolicy},
    store::{CallStore, Snapshot, StoreClosed},
};

#[doc(inline)]
pub use self::lifecycle::{transition, CallError, Intent, Stage, Transition};

/// Calls by their CIDs.
pub(crate) type Registry = Mutex<HashMap<String, Call>>;

struct Inner {
    conf: Conf,
    ctx: Context,
    call_type: String,
    call_id: String,
    store: Arc<CallStore>,
    session: MediaSession,
    lifecycle: Lifecycle,
    scope: TaskScope,

    /// Registry the call is evicted from once left.
    registry: Weak<Registry>,
}

/// Handle to a single call.
///
/// Cloned handles refer to the same call.
#[derive(Clone)]
pub struct Call(Arc<Inner>);

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("cid", &self.cid())
            .field("stage", &self.stage())
            .finish()
    }
}

impl Call {
    pub(crate) fn new(
        ctx: Context,
        conf: Conf,
        call_type: &str,
        call_id: &str,
        registry: Weak<Registry>,
    ) -> Self {
        let scope = TaskScope::new();
        let store = Arc::new(CallStore::new(
            CallState::new(call_type, call_id),
            conf.call.participants_threshold,
        ));
        let session = MediaSession::new(
            ctx.clone(),
            conf.clone(),
            call_type,
            call_id,
            Arc::clone(&store),
            scope.clone(),
        );
        let events = session.on_event();
        let call = Self(Arc::new(Inner {
            conf,
            ctx,
            call_type: call_type.to_owned(),
            call_id: call_id.to_owned(),
            store,
            session,
            lifecycle: Lifecycle::new(scope.clone()),
            scope,
            registry,
        }));
        call.0
            .scope
            .spawn(watch_session(Arc::downgrade(&call.0), events));
        call
    }

    /// Type of this call.
    #[inline]
    #[must_use]
    pub fn call_type(&self) -> &str {
        &self.0.call_type
    }

    /// ID of this call.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.0.call_id
    }

    /// CID of this call (`{type}:{id}`).
    #[must_use]
    pub fn cid(&self) -> String {
        format!("{}:{}", self.0.call_type, self.0.call_id)
    }

    /// Current lifecycle [`Stage`].
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.0.lifecycle.stage()
    }

    /// Returns a stream of lifecycle [`Stage`] changes, starting with the
    /// current one.
    pub fn on_stage_change(&self) -> BoxStream<'static, Stage> {
        self.0.lifecycle.on_stage_change()
    }

    /// Current [`CallState`].
    #[must_use]
    pub fn state(&self) -> Arc<CallState> {
        self.0.store.state()
    }

    /// Current versioned [`Snapshot`] of the [`CallState`].
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.0.store.snapshot()
    }

    /// Returns a stream of the [`CallState`] [`Snapshot`]s, starting with
    /// the current one.
    pub fn subscribe(&self) -> BoxStream<'static, Snapshot> {
        self.0.store.subscribe()
    }

    /// Returns a stream of the participants joining and leaving this call.
    pub fn on_participant_event(&self) -> BoxStream<'static, ParticipantEvent> {
        self.0.store.on_participant_event()
    }

    /// Current [`SessionState`] of the media session.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.0.session.state()
    }

    /// Returns a stream of [`SessionState`] changes, starting with the
    /// current one.
    pub fn on_session_state_change(&self) -> BoxStream<'static, SessionState> {
        self.0.session.on_state_change()
    }

    /// Name of the SFU edge the call is connected to.
    #[must_use]
    pub fn edge_name(&self) -> Option<String> {
        self.0.session.edge_name()
    }

    /// Local tracks of this call.
    #[must_use]
    pub fn local_media(&self) -> &LocalMedia {
        self.0.session.local_media()
    }

    /// Joins this call, creating it if `create` is set.
    ///
    /// Resolves right away if the call is joined already, and joins the
    /// running join if there is one. Each attempt is bounded by the join
    /// timeout, and a failed one is retried up to the configured number of
    /// times.
    ///
    /// # Errors
    ///
    /// With the [`CallError`] of the last attempt, which also moves the
    /// call into [`Stage::Error`].
    pub async fn join(&self, create: bool) -> Result<(), Traced<CallError>> {
        let inner = Arc::clone(&self.0);
        self.0
            .lifecycle
            .run(Intent::Join, move || async move {
                connect(&inner, create).await
            })
            .await
            .map_err(|e| tracerr::new!(e))
    }

    /// Accepts this call.
    ///
    /// # Errors
    ///
    /// If the coordinator fails to accept the call in time.
    pub async fn accept(&self) -> Result<(), Traced<CallError>> {
        let inner = Arc::clone(&self.0);
        self.0
            .lifecycle
            .run(Intent::Accept, move || async move {
                let timeout = inner.conf.call.accept_timeout;
                let req = inner.ctx.coordinator.accept_call(
                    inner.call_type.clone(),
                    inner.call_id.clone(),
                );
                match tokio::time::timeout(timeout, req).await {
                    Ok(res) => res.map_err(|e| CallError::from(e.into_inner())),
                    Err(_) => Err(CallError::Timeout(Intent::Accept)),
                }
            })
            .await
            .map_err(|e| tracerr::new!(e))
    }

    /// Rejects this call.
    ///
    /// # Errors
    ///
    /// If the coordinator fails to reject the call in time.
    pub async fn reject(&self) -> Result<(), Traced<CallError>> {
        let inner = Arc::clone(&self.0);
        self.0
            .lifecycle
            .run(Intent::Reject, move || async move {
                let timeout = inner.conf.call.reject_timeout;
                let req = inner.ctx.coordinator.reject_call(
                    inner.call_type.clone(),
                    inner.call_id.clone(),
                );
                match tokio::time::timeout(timeout, req).await {
                    Ok(res) => res.map_err(|e| CallError::from(e.into_inner())),
                    Err(_) => Err(CallError::Timeout(Intent::Reject)),
                }
            })
            .await
            .map_err(|e| tracerr::new!(e))
    }

    /// Leaves this call: cancels everything in progress, tears the media
    /// session down and evicts the call from its [`Client`].
    ///
    /// The left call cannot be joined again, a new one should be obtained
    /// from the [`Client`] instead.
    ///
    /// [`Client`]: crate::Client
    pub async fn leave(&self) {
        leave(&self.0, "user is leaving the call").await;
    }

    /// Unmutes or mutes the microphone.
    ///
    /// # Errors
    ///
    /// Without the permission to send audio, or if the microphone cannot be
    /// captured.
    pub async fn set_audio_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .set_audio_enabled(enabled)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Unmutes or mutes the camera.
    ///
    /// # Errors
    ///
    /// Without the permission to send video, or if the camera cannot be
    /// captured.
    pub async fn set_video_enabled(
        &self,
        enabled: bool,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .set_video_enabled(enabled)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Starts sharing the screen.
    ///
    /// # Errors
    ///
    /// Without the permission to share the screen, or if the screen cannot
    /// be captured.
    pub async fn start_screenshare(&self) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .start_screenshare()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Stops sharing the screen.
    pub fn stop_screenshare(&self) {
        self.0.session.stop_screenshare();
    }

    /// Switches the camera to the provided [`CameraPosition`].
    ///
    /// # Errors
    ///
    /// If the camera cannot be captured.
    pub async fn change_camera_position(
        &self,
        position: CameraPosition,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .change_camera_position(position)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Sets whether the video of the provided participant is wanted.
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn set_track_visibility(
        &self,
        session_id: &str,
        visible: bool,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .set_track_visibility(session_id, visible)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Sets the size the video of the provided participant is rendered at.
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn update_track_size(
        &self,
        session_id: &str,
        size: VideoDimension,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .update_track_size(session_id, size)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Sets the [`IncomingVideoPolicy`].
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn set_incoming_video_policy(
        &self,
        policy: IncomingVideoPolicy,
    ) -> Result<(), Traced<CallError>> {
        self.0
            .session
            .set_incoming_video_policy(policy)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> CallError))
    }

    /// Pins the provided participant locally.
    ///
    /// Returns `false` if there is no such participant.
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn pin(
        &self,
        session_id: &str,
    ) -> Result<bool, Traced<CallError>> {
        let session_id = session_id.to_owned();
        self.update(move |s| s.pin(&session_id, Utc::now())).await
    }

    /// Removes the pin of the provided participant.
    ///
    /// Returns `false` if there is no such participant.
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn unpin(
        &self,
        session_id: &str,
    ) -> Result<bool, Traced<CallError>> {
        let session_id = session_id.to_owned();
        self.update(move |s| s.unpin(&session_id)).await
    }

    /// Applies the call metadata returned by the coordinator.
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn update_from(
        &self,
        call: CallResponse,
    ) -> Result<(), Traced<CallError>> {
        self.update(move |s| s.update_from(&call)).await
    }

    /// Applies the provided [`CoordinatorEvent`].
    ///
    /// # Errors
    ///
    /// If the call has been left.
    pub async fn apply_coordinator_event(
        &self,
        event: CoordinatorEvent,
    ) -> Result<(), Traced<CallError>> {
        self.update(move |s| s.apply_coordinator_event(&event)).await
    }

    async fn update<R, F>(&self, f: F) -> Result<R, Traced<CallError>>
    where
        F: FnOnce(&mut CallState) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.0
            .store
            .update(f)
            .await
            .map_err(|e: StoreClosed| tracerr::new!(CallError::from(e)))
    }
}

/// Connects the media session, retrying failed attempts.
async fn connect(inner: &Inner, create: bool) -> Result<(), CallError> {
    let policy = RetryPolicy {
        max_retries: inner.conf.call.join_retries,
        ..inner.conf.retry.fast.clone()
    };
    let timeout = inner.conf.call.join_timeout;
    retry::execute(
        &policy,
        || !inner.scope.is_cancelled(),
        || async move {
            let attempt = inner.session.connect(create);
            match tokio::time::timeout(timeout, attempt).await {
                Ok(res) => res.map_err(|e| CallError::from(e.into_inner())),
                Err(_) => {
                    inner.session.abort_connect().await;
                    Err(CallError::Timeout(Intent::Join))
                }
            }
        },
    )
    .await
}

async fn leave(inner: &Inner, reason: &str) {
    inner.scope.cancel();
    inner.session.leave(reason).await;
    inner.lifecycle.reset();
    inner.store.close();

    if let Some(registry) = inner.registry.upgrade() {
        let cid = format!("{}:{}", inner.call_type, inner.call_id);
        drop(lock(&registry).remove(&cid));
    }
}

/// Drives the call lifecycle by the [`SessionEvent`]s.
async fn watch_session(
    inner: Weak<Inner>,
    mut events: BoxStream<'static, SessionEvent>,
) {
    while let Some(event) = events.next().await {
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        match event {
            SessionEvent::Failed(e) => {
                inner.lifecycle.fail(CallError::from(e));
            }
            SessionEvent::Ended => {
                // Leaving cancels the scope this task runs in.
                drop(tokio::spawn(async move {
                    leave(&inner, "call has been ended").await;
                }));
                break;
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
