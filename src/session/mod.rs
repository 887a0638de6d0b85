//! Media session of a call: the SFU signaling, the publisher and subscriber
//! peer connections and the local media, kept in sync with the call state.

mod link;
mod migration;
mod mute;
mod publisher;
mod reconnect;
mod subscriptions;

use std::{
    collections::HashMap,
    sync::{atomic::AtomicU64, Arc, Mutex, MutexGuard, PoisonError},
};

use derive_more::{Display, From};
use futures::{channel::mpsc, stream::BoxStream};
use rand::{distributions::Alphanumeric, Rng as _};
use tandem_reactive::ObservableCell;
use tandem_sfu_proto::{
    ReconnectDetails, ReconnectStrategy, SfuError, SfuRequest, TrackType,
};
use tokio::time::Instant;
use tracerr::Traced;

use crate::{
    call::{
        state::{CallState, ReconnectionStatus},
        store::{CallStore, StoreClosed},
    },
    client::Context,
    conf::Conf,
    coordinator::{
        CoordinatorError, JoinCallRequest, JoinCallResponse, OwnCapability,
    },
    media::LocalMedia,
    peer::{Munging, PeerConnection, PeerError},
    platform::MediaSourceError,
    rpc::{RpcClientError, SfuCredentials, SignalError},
    utils::{Categorized, ErrorKind, Retryable, TaskHandle, TaskScope},
};

use self::{link::Link, publisher::Publisher};

pub use self::subscriptions::compute as compute_subscriptions;

/// Length of the generated session IDs.
const SESSION_ID_LEN: usize = 32;

/// Errors of a [`MediaSession`].
#[derive(Clone, Debug, Display, From)]
pub enum SessionError {
    #[display(fmt = "{}", _0)]
    Rpc(RpcClientError),

    #[display(fmt = "{}", _0)]
    Signal(SignalError),

    #[display(fmt = "{}", _0)]
    Peer(PeerError),

    #[display(fmt = "{}", _0)]
    Media(MediaSourceError),

    #[display(fmt = "{}", _0)]
    Coordinator(CoordinatorError),

    #[display(fmt = "{}", _0)]
    Store(StoreClosed),

    /// Local user lacks the capability required by the requested action.
    #[display(fmt = "Missing capability: {}", _0)]
    #[from(ignore)]
    Forbidden(OwnCapability),

    /// SFU rejected the join request.
    #[display(fmt = "Join rejected: {}", _0)]
    #[from(ignore)]
    JoinRejected(SfuError),

    /// SFU didn't answer the join request in time.
    #[display(fmt = "SFU didn't answer the join request in time")]
    #[from(ignore)]
    JoinTimeout,

    /// Operation requires an established media session.
    #[display(fmt = "Media session is not connected")]
    #[from(ignore)]
    NotConnected,

    /// Media session has been closed.
    #[display(fmt = "Media session is closed")]
    #[from(ignore)]
    Closed,

    /// Full reconnection attempts are exhausted.
    #[display(fmt = "Failed to reconnect after {} attempts", _0)]
    #[from(ignore)]
    ReconnectFailed(u32),

    /// SFU asked the client to disconnect.
    #[display(fmt = "Disconnected by SFU: {}", _0)]
    #[from(ignore)]
    Disconnected(SfuError),
}

impl Categorized for SessionError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Rpc(e) => e.kind(),
            Self::Signal(e) => e.kind(),
            Self::Peer(e) => e.kind(),
            Self::Coordinator(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::Forbidden(_) => ErrorKind::Permission,
            Self::JoinTimeout | Self::NotConnected => ErrorKind::Transport,
            Self::Media(_)
            | Self::JoinRejected(_)
            | Self::Closed
            | Self::ReconnectFailed(_)
            | Self::Disconnected(_) => ErrorKind::Unrecoverable,
        }
    }
}

impl Retryable for SessionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc(e) => e.is_retryable(),
            Self::Signal(e) => e.is_retryable(),
            Self::Coordinator(e) => e.is_retryable(),
            Self::JoinRejected(e) => e.should_retry,
            Self::JoinTimeout | Self::NotConnected => true,
            Self::Peer(_)
            | Self::Media(_)
            | Self::Store(_)
            | Self::Forbidden(_)
            | Self::Closed
            | Self::ReconnectFailed(_)
            | Self::Disconnected(_) => false,
        }
    }
}

/// Connection state of a [`MediaSession`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Migrating,
    Closed,
}

impl SessionState {
    /// Indicates whether the session is established or being established.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Connected
                | Self::Reconnecting
                | Self::Migrating
        )
    }
}

impl From<SessionState> for ReconnectionStatus {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Connected => Self::Connected,
            SessionState::Reconnecting => Self::Reconnecting,
            SessionState::Migrating => Self::Migrating,
            SessionState::Idle
            | SessionState::Connecting
            | SessionState::Closed => Self::Disconnected,
        }
    }
}

/// Notification of a [`MediaSession`] its owner must react to.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// Session cannot recover from the provided error.
    Failed(SessionError),

    /// Call has been ended by the SFU.
    Ended,
}

/// Shared state of a [`MediaSession`] and its tasks.
struct Inner {
    ctx: Context,
    conf: Conf,
    call_type: String,
    call_id: String,
    store: Arc<CallStore>,
    media: LocalMedia,

    /// Cancellation scope of every task spawned by this session.
    scope: TaskScope,

    state: ObservableCell<SessionState>,

    /// Signaling of the SFU the session is connected to.
    link: Mutex<Option<Arc<Link>>>,

    publisher: Mutex<Option<Publisher>>,

    /// Subscriber of the SFU the session is migrating from, kept until the
    /// new subscriber connects.
    temporary_subscriber: Mutex<Option<Arc<PeerConnection>>>,

    credentials: Mutex<Option<SfuCredentials>>,
    session_id: Mutex<String>,

    /// Incremented on every computation of the remote track subscriptions.
    subscriptions_marker: AtomicU64,

    /// Desired mute states of the published tracks.
    mute_states: Mutex<HashMap<TrackType, bool>>,

    /// Moment the network became unavailable, if it's still not restored.
    disconnected_at: Mutex<Option<Instant>>,

    /// Held during a reconnection or migration.
    recovery: tokio::sync::Mutex<()>,

    event_subs: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,

    /// Watcher of the network reachability.
    network_watcher: Mutex<Option<TaskHandle>>,
}

impl Inner {
    fn munging(&self) -> Munging {
        Munging {
            dtx: self.conf.media.dtx,
            red: self.conf.media.red,
        }
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        lock(&self.link).clone()
    }

    fn is_current(&self, link: &Arc<Link>) -> bool {
        lock(&self.link)
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, link))
    }

    fn publisher(&self) -> Option<Arc<PeerConnection>> {
        lock(&self.publisher).as_ref().map(|p| Arc::clone(&p.peer))
    }

    fn session_id(&self) -> String {
        lock(&self.session_id).clone()
    }

    fn credentials(&self) -> Option<SfuCredentials> {
        lock(&self.credentials).clone()
    }

    fn call_state(&self) -> Arc<CallState> {
        self.store.state()
    }

    fn has_capability(&self, capability: OwnCapability) -> bool {
        self.call_state().has_capability(capability)
    }

    fn is_active(&self) -> bool {
        !self.scope.is_cancelled() && self.state.get().is_active()
    }

    async fn set_state(&self, state: SessionState) {
        self.state.set(state);
        let status = ReconnectionStatus::from(state);
        if self
            .store
            .update(move |s| s.reconnection_status = status)
            .await
            .is_err()
        {
            log::debug!("Reconnection status not stored: store is closed");
        }
    }

    fn notify(&self, event: SessionEvent) {
        lock(&self.event_subs)
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    fn fail(&self, err: Traced<SessionError>) {
        log::error!("Media session failed: {}", err);
        self.notify(SessionEvent::Failed(err.into_inner()));
    }

    /// Fetches new SFU credentials from the coordinator, applying the
    /// returned call metadata to the call state.
    async fn fetch_credentials(
        &self,
        create: bool,
        migrating_from: Option<String>,
    ) -> Result<SfuCredentials, Traced<SessionError>> {
        let JoinCallResponse {
            call,
            members,
            own_capabilities,
            credentials,
        } = self
            .ctx
            .coordinator
            .join_call(JoinCallRequest {
                call_type: self.call_type.clone(),
                call_id: self.call_id.clone(),
                create,
                ring: false,
                migrating_from,
            })
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;

        self.store
            .update(move |s| {
                s.update_from(&call);
                s.merge_members(members);
                s.set_own_capabilities(own_capabilities);
            })
            .await
            .map_err(|e| tracerr::new!(SessionError::from(e)))?;

        *lock(&self.credentials) = Some(credentials.clone());
        Ok(credentials)
    }

    /// Assigns the provided session ID to the local session.
    async fn set_session_id(
        &self,
        session_id: String,
    ) -> Result<(), Traced<SessionError>> {
        *lock(&self.session_id) = session_id.clone();
        self.store
            .update(move |s| s.session_id = session_id)
            .await
            .map_err(|e| tracerr::new!(SessionError::from(e)))
    }

    /// Describes the current publishing and subscriptions for a join request
    /// restoring them on the SFU.
    fn reconnect_details(
        &self,
        strategy: ReconnectStrategy,
        reconnect_attempt: u32,
    ) -> ReconnectDetails {
        ReconnectDetails {
            strategy,
            announced_tracks: self
                .publisher()
                .map(|p| p.track_infos(self.munging()))
                .unwrap_or_default(),
            subscriptions: subscriptions::compute(&self.call_state()),
            reconnect_attempt,
            from_sfu_id: self
                .current_link()
                .map(|l| l.signal.edge_name().to_owned())
                .unwrap_or_default(),
            previous_session_id: self.session_id(),
        }
    }

    /// Makes the provided [`Link`] the current one, closing the previous
    /// one.
    ///
    /// Returns the subscriber of the previous [`Link`] if it's asked to be
    /// kept.
    fn commit_link(
        &self,
        link: Arc<Link>,
        keep_old_subscriber: bool,
    ) -> Option<Arc<PeerConnection>> {
        let previous = lock(&self.link).replace(link);
        previous.and_then(|old| old.close(keep_old_subscriber))
    }

    /// Closes the signaling and both peer connections, keeping the local
    /// tracks.
    fn teardown_transport(&self) {
        if let Some(link) = lock(&self.link).take() {
            drop(link.close(false));
        }
        if let Some(temporary) = lock(&self.temporary_subscriber).take() {
            temporary.close();
        }
        if let Some(publisher) = lock(&self.publisher).take() {
            publisher.peer.close();
        }
    }
}

/// Media session of a single call.
///
/// Owns the [`Link`] to the SFU (socket and signal service) with the
/// subscriber peer connection, the publisher peer connection and the local
/// tracks. Every mutation of the call state goes through the [`CallStore`].
pub struct MediaSession(Arc<Inner>);

impl MediaSession {
    /// Creates a new idle [`MediaSession`] of the provided call.
    ///
    /// All its tasks are spawned in the provided [`TaskScope`].
    #[must_use]
    pub fn new(
        ctx: Context,
        conf: Conf,
        call_type: &str,
        call_id: &str,
        store: Arc<CallStore>,
        scope: TaskScope,
    ) -> Self {
        let media = LocalMedia::new(Arc::clone(&ctx.media_source));
        Self(Arc::new(Inner {
            ctx,
            conf,
            call_type: call_type.to_owned(),
            call_id: call_id.to_owned(),
            store,
            media,
            scope,
            state: ObservableCell::new(SessionState::Idle),
            link: Mutex::new(None),
            publisher: Mutex::new(None),
            temporary_subscriber: Mutex::new(None),
            credentials: Mutex::new(None),
            session_id: Mutex::new(String::new()),
            subscriptions_marker: AtomicU64::new(0),
            mute_states: Mutex::new(HashMap::new()),
            disconnected_at: Mutex::new(None),
            recovery: tokio::sync::Mutex::new(()),
            event_subs: Mutex::new(Vec::new()),
            network_watcher: Mutex::new(None),
        }))
    }

    /// Current [`SessionState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.0.state.get()
    }

    /// Returns a stream of [`SessionState`] changes, starting with the
    /// current one.
    #[inline]
    pub fn on_state_change(&self) -> BoxStream<'static, SessionState> {
        self.0.state.subscribe()
    }

    /// Returns a stream of the [`SessionEvent`]s.
    pub fn on_event(&self) -> BoxStream<'static, SessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.0.event_subs).push(tx);
        Box::pin(rx)
    }

    /// ID of the local session on the SFU.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.0.session_id()
    }

    /// Name of the SFU edge the session is connected to.
    #[must_use]
    pub fn edge_name(&self) -> Option<String> {
        self.0
            .current_link()
            .map(|l| l.signal.edge_name().to_owned())
    }

    /// Local tracks of this session.
    #[inline]
    #[must_use]
    pub fn local_media(&self) -> &LocalMedia {
        &self.0.media
    }

    /// Connects to the SFU, no-op if the session is already connected or
    /// being connected.
    ///
    /// Fetches the SFU credentials from the coordinator (creating the call if
    /// `create` is set), captures the local tracks allowed by the own
    /// capabilities, joins the SFU and publishes those tracks.
    ///
    /// # Errors
    ///
    /// With [`SessionError`] if any step fails, leaving the session idle.
    pub async fn connect(
        &self,
        create: bool,
    ) -> Result<(), Traced<SessionError>> {
        let inner = &self.0;
        match inner.state.get() {
            SessionState::Closed => {
                return Err(tracerr::new!(SessionError::Closed));
            }
            s if s.is_active() => return Ok(()),
            _ => {}
        }
        inner.set_state(SessionState::Connecting).await;

        if let Err(e) = join(inner, create, None).await {
            inner.teardown_transport();
            if inner.state.get() != SessionState::Closed {
                inner.set_state(SessionState::Idle).await;
            }
            return Err(e);
        }
        reconnect::watch_network(inner);
        Ok(())
    }

    /// Aborts a connection which hasn't been completed, leaving the session
    /// idle.
    pub async fn abort_connect(&self) {
        let inner = &self.0;
        if inner.state.get() == SessionState::Connecting {
            inner.teardown_transport();
            inner.set_state(SessionState::Idle).await;
        }
    }

    /// Reconnects with the provided [`ReconnectStrategy`].
    ///
    /// [`ReconnectStrategy::Disconnect`] fails the session.
    pub async fn reconnect(&self, strategy: ReconnectStrategy) {
        let inner = Arc::clone(&self.0);
        match strategy {
            ReconnectStrategy::Fast => reconnect::fast(inner).await,
            ReconnectStrategy::Rejoin => reconnect::full(inner).await,
            ReconnectStrategy::Migrate => migration::migrate(inner).await,
            ReconnectStrategy::Disconnect => {
                inner.fail(tracerr::new!(SessionError::Disconnected(SfuError {
                    code: 0,
                    message: "disconnect requested".into(),
                    should_retry: false,
                })));
            }
            ReconnectStrategy::Unspecified => {}
        }
    }

    /// Leaves the call: informs the SFU (best effort), cancels all the
    /// tasks and releases the connections and the local tracks.
    pub async fn leave(&self, reason: &str) {
        let inner = &self.0;
        inner.scope.cancel();
        drop(lock(&inner.network_watcher).take());

        if let Some(link) = inner.current_link() {
            let msg = SfuRequest::LeaveCall {
                session_id: inner.session_id(),
                reason: reason.to_owned(),
            };
            if let Err(e) = link.channel.send(&msg) {
                log::debug!("Failed to send leave request: {}", e);
            }
        }
        inner.teardown_transport();
        inner.media.stop_all();
        inner.set_state(SessionState::Closed).await;
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        drop(lock(&self.0.network_watcher).take());
        self.0.teardown_transport();
    }
}

/// Joins the SFU from scratch with a new session ID, replacing the current
/// [`Link`] if any.
async fn join(
    inner: &Arc<Inner>,
    create: bool,
    details: Option<ReconnectDetails>,
) -> Result<(), Traced<SessionError>> {
    let credentials = inner.fetch_credentials(create, None).await?;
    inner.set_session_id(new_session_id()).await?;

    publisher::capture_allowed_tracks(inner).await;

    let link =
        Link::join(inner, &credentials, inner.session_id(), false, details)
            .await?;
    if inner.scope.is_cancelled() {
        drop(link.close(false));
        return Err(tracerr::new!(SessionError::Closed));
    }
    drop(inner.commit_link(link, false));

    publisher::publish_allowed_tracks(inner)?;
    subscriptions::refresh(inner);
    inner.set_state(SessionState::Connected).await;
    Ok(())
}

/// Generates a new random session ID.
fn new_session_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod spec {
    use tandem_sfu_proto::SfuError;

    use crate::{
        call::state::ReconnectionStatus,
        coordinator::OwnCapability,
        rpc::SignalError,
        utils::{Categorized as _, ErrorKind, Retryable as _},
    };

    use super::{new_session_id, SessionError, SessionState};

    #[test]
    fn session_ids_are_unique() {
        let id = new_session_id();

        assert_eq!(id.len(), 32);
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn classifies_errors() {
        let sfu = SfuError {
            code: 1,
            message: "overloaded".into(),
            should_retry: true,
        };

        assert_eq!(
            SessionError::Forbidden(OwnCapability::Screenshare).kind(),
            ErrorKind::Permission,
        );
        assert!(SessionError::JoinRejected(sfu.clone()).is_retryable());
        assert!(SessionError::from(SignalError::Transport("reset".into()))
            .is_retryable());
        assert!(!SessionError::Disconnected(sfu).is_retryable());
    }

    #[test]
    fn maps_state_to_reconnection_status() {
        assert_eq!(
            ReconnectionStatus::from(SessionState::Migrating),
            ReconnectionStatus::Migrating,
        );
        assert_eq!(
            ReconnectionStatus::from(SessionState::Connecting),
            ReconnectionStatus::Disconnected,
        );
        assert!(!SessionState::Closed.is_active());
    }
}
