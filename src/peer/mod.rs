//! Adapter of a single [`RtcPeerConnection`] playing the publisher or the
//! subscriber role in a media session.

mod ice_candidates;
pub mod sdp;
pub mod simulcast;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use derive_more::{Display, From};
use futures::{
    channel::mpsc,
    future::{self, BoxFuture, FutureExt as _},
    stream::{BoxStream, StreamExt as _},
};
use tandem_reactive::ObservableCell;
use tandem_sfu_proto::{PeerType, TrackInfo, TrackType};
use tracerr::Traced;

use crate::{
    platform::{
        IceCandidate, MediaStreamTrack, PeerConnectionFactory,
        PeerConnectionState, RemoteStream, RtcConfiguration, RtcEvent,
        RtcPeerConnection, RtcPeerConnectionError, SessionDescription,
        Transceiver, TransceiverDirection, TransceiverInit,
    },
    utils::{Categorized, ErrorKind, TaskHandle},
};

#[doc(inline)]
pub use self::{ice_candidates::IceCandidates, sdp::Munging};

/// Errors of a [`PeerConnection`].
#[derive(Clone, Debug, Display, From)]
pub enum PeerError {
    /// Media engine failed to perform an operation.
    #[display(fmt = "{}", _0)]
    RtcPeerConnection(RtcPeerConnectionError),

    /// [`PeerConnection`] has been closed.
    #[display(fmt = "Peer connection is closed")]
    Closed,
}

impl Categorized for PeerError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::RtcPeerConnection(_) => ErrorKind::Unrecoverable,
            Self::Closed => ErrorKind::Transport,
        }
    }
}

/// Events emitted by a [`PeerConnection`].
#[derive(Clone, Debug)]
pub enum PeerEvent {
    /// New local ICE candidate has been discovered.
    IceCandidateDiscovered {
        peer_type: PeerType,
        candidate: IceCandidate,
    },

    /// [`PeerConnectionState`] has changed.
    ConnectionStateChanged {
        peer_type: PeerType,
        state: PeerConnectionState,
    },

    /// Local changes require renegotiation.
    NegotiationNeeded { peer_type: PeerType },

    /// Remote stream has been received.
    StreamAdded {
        peer_type: PeerType,
        stream: RemoteStream,
    },

    /// Remote stream has been removed.
    StreamRemoved {
        peer_type: PeerType,
        stream_id: String,
    },
}

/// Outgoing track of a [`PeerConnection`] of a single [`TrackType`].
struct Sender {
    transceiver: Arc<dyn Transceiver>,
    track: Option<Arc<dyn MediaStreamTrack>>,
}

struct Inner {
    /// Subscribers to the [`PeerEvent`]s.
    subs: Vec<mpsc::UnboundedSender<PeerEvent>>,

    /// [`Sender`]s by their [`TrackType`], at most one per type.
    senders: HashMap<TrackType, Sender>,

    /// Task translating the [`RtcEvent`]s into [`PeerEvent`]s.
    events_task: Option<TaskHandle>,
}

/// Adapter of a single [`RtcPeerConnection`].
///
/// Buffers remote ICE candidates until the remote description is set, keeps
/// at most one [`Transceiver`] per [`TrackType`] and serializes negotiations
/// via [`PeerConnection::negotiation_lock`].
pub struct PeerConnection {
    peer_type: PeerType,
    peer: Arc<dyn RtcPeerConnection>,
    inner: Arc<Mutex<Inner>>,
    ice_candidates: tokio::sync::Mutex<IceCandidates>,
    negotiation: tokio::sync::Mutex<()>,
    paused: Arc<AtomicBool>,
    state: Arc<ObservableCell<PeerConnectionState>>,
}

impl PeerConnection {
    /// Creates a new [`PeerConnection`] of the provided [`PeerType`].
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine fails to
    /// create the underlying [`RtcPeerConnection`].
    pub fn new(
        peer_type: PeerType,
        factory: &dyn PeerConnectionFactory,
        config: &RtcConfiguration,
    ) -> Result<Self, Traced<PeerError>> {
        let peer = factory
            .create_peer_connection(config)
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))?;
        let state = Arc::new(ObservableCell::new(peer.connection_state()));
        let paused = Arc::new(AtomicBool::new(false));
        let inner = Arc::new(Mutex::new(Inner {
            subs: Vec::new(),
            senders: HashMap::new(),
            events_task: None,
        }));

        let mut rtc_events = peer.subscribe();
        let weak_inner = Arc::downgrade(&inner);
        let events_state = Arc::clone(&state);
        let events_paused = Arc::clone(&paused);
        let (events, abort) = future::abortable(async move {
            while let Some(event) = rtc_events.next().await {
                let event = match event {
                    RtcEvent::IceCandidate(candidate) => {
                        if events_paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        PeerEvent::IceCandidateDiscovered {
                            peer_type,
                            candidate,
                        }
                    }
                    RtcEvent::ConnectionStateChanged(state) => {
                        events_state.set(state);
                        PeerEvent::ConnectionStateChanged { peer_type, state }
                    }
                    RtcEvent::NegotiationNeeded => {
                        PeerEvent::NegotiationNeeded { peer_type }
                    }
                    RtcEvent::StreamAdded(stream) => {
                        PeerEvent::StreamAdded { peer_type, stream }
                    }
                    RtcEvent::StreamRemoved(stream_id) => {
                        PeerEvent::StreamRemoved {
                            peer_type,
                            stream_id,
                        }
                    }
                };
                match weak_inner.upgrade() {
                    Some(inner) => lock(&inner).subs.retain(|sub| {
                        sub.unbounded_send(event.clone()).is_ok()
                    }),
                    None => break,
                }
            }
        });
        drop(tokio::spawn(events));
        lock(&inner).events_task = Some(abort.into());

        Ok(Self {
            peer_type,
            peer,
            inner,
            ice_candidates: tokio::sync::Mutex::new(IceCandidates::new()),
            negotiation: tokio::sync::Mutex::new(()),
            paused,
            state,
        })
    }

    /// [`PeerType`] of this [`PeerConnection`].
    #[inline]
    #[must_use]
    pub fn peer_type(&self) -> PeerType {
        self.peer_type
    }

    /// Returns a [`BoxStream`] of all the [`PeerEvent`]s emitted from now on.
    pub fn subscribe(&self) -> BoxStream<'static, PeerEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.inner).subs.push(tx);
        Box::pin(rx)
    }

    /// Current [`PeerConnectionState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> PeerConnectionState {
        self.state.get()
    }

    /// Returns a [`BoxStream`] of [`PeerConnectionState`] changes, starting
    /// with the current one.
    #[inline]
    pub fn on_state_change(&self) -> BoxStream<'static, PeerConnectionState> {
        self.state.subscribe()
    }

    /// Resolves once this [`PeerConnection`] is connected.
    ///
    /// Never resolves if it's dropped before being connected.
    pub fn when_connected(&self) -> BoxFuture<'static, ()> {
        self.state
            .when_eq(PeerConnectionState::Connected)
            .then(|res| async move {
                if res.is_err() {
                    future::pending::<()>().await;
                }
            })
            .boxed()
    }

    /// Acquires the lock which must be held during a whole offer/answer
    /// exchange.
    ///
    /// Waiters acquire it in the order they've requested it.
    pub async fn negotiation_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.negotiation.lock().await
    }

    /// Creates a new SDP offer without applying it.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine fails.
    pub async fn create_offer(
        &self,
        ice_restart: bool,
    ) -> Result<SessionDescription, Traced<PeerError>> {
        self.peer
            .create_offer(ice_restart)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))
    }

    /// Creates a new SDP answer to the current remote offer without applying
    /// it.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine fails.
    pub async fn create_answer(
        &self,
    ) -> Result<SessionDescription, Traced<PeerError>> {
        self.peer
            .create_answer()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))
    }

    /// Applies the provided local [`SessionDescription`].
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine rejects it.
    pub async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Traced<PeerError>> {
        self.peer
            .set_local_description(desc)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))
    }

    /// Applies the provided remote [`SessionDescription`] and then flushes
    /// all the buffered remote [`IceCandidate`]s in their arrival order.
    ///
    /// Buffered candidates failing to be added are logged and skipped.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine rejects the
    /// description.
    pub async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Traced<PeerError>> {
        let mut candidates = self.ice_candidates.lock().await;
        self.peer
            .set_remote_description(desc)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))?;
        for candidate in candidates.flush() {
            if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                log::warn!(
                    "Failed to add buffered ICE candidate to {} peer: {}",
                    self.peer_type,
                    e,
                );
            }
        }
        Ok(())
    }

    /// Adds the provided remote [`IceCandidate`], buffering it if the remote
    /// description is not set yet.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine rejects the
    /// candidate.
    pub async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Traced<PeerError>> {
        let mut candidates = self.ice_candidates.lock().await;
        if let Some(candidate) = candidates.push(candidate) {
            self.peer
                .add_ice_candidate(candidate)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> PeerError))?;
        }
        Ok(())
    }

    /// Number of the remote [`IceCandidate`]s waiting for the remote
    /// description.
    pub async fn candidates_buffer_len(&self) -> usize {
        self.ice_candidates.lock().await.len()
    }

    /// Publishes the provided track of the provided [`TrackType`].
    ///
    /// Reuses the [`Transceiver`] of this [`TrackType`] if there is one
    /// already, replacing its track, so there is never more than one
    /// [`Transceiver`] per [`TrackType`].
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the media engine fails to
    /// add a new [`Transceiver`].
    pub fn add_transceiver(
        &self,
        track_type: TrackType,
        track: Arc<dyn MediaStreamTrack>,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>, Traced<PeerError>> {
        let mut inner = lock(&self.inner);
        if let Some(sender) = inner.senders.get_mut(&track_type) {
            sender.transceiver.replace_track(Some(Arc::clone(&track)));
            sender.track = Some(track);
            return Ok(Arc::clone(&sender.transceiver));
        }

        let transceiver = self
            .peer
            .add_transceiver(Arc::clone(&track), init)
            .map_err(tracerr::map_from_and_wrap!(=> PeerError))?;
        drop(inner.senders.insert(
            track_type,
            Sender {
                transceiver: Arc::clone(&transceiver),
                track: Some(track),
            },
        ));
        Ok(transceiver)
    }

    /// Stops publishing the track of the provided [`TrackType`], keeping its
    /// [`Transceiver`] for reuse.
    ///
    /// Returns the unpublished track, if any.
    pub fn remove_track(
        &self,
        track_type: TrackType,
    ) -> Option<Arc<dyn MediaStreamTrack>> {
        let mut inner = lock(&self.inner);
        let sender = inner.senders.get_mut(&track_type)?;
        sender.transceiver.replace_track(None);
        sender.track.take()
    }

    /// Returns the [`Transceiver`] of the provided [`TrackType`].
    #[must_use]
    pub fn transceiver(
        &self,
        track_type: TrackType,
    ) -> Option<Arc<dyn Transceiver>> {
        lock(&self.inner)
            .senders
            .get(&track_type)
            .map(|s| Arc::clone(&s.transceiver))
    }

    /// Returns the [`TrackType`]s being published.
    #[must_use]
    pub fn published_tracks(&self) -> Vec<TrackType> {
        let mut tracks: Vec<_> = lock(&self.inner)
            .senders
            .iter()
            .filter(|(_, s)| s.track.is_some())
            .map(|(tt, _)| *tt)
            .collect();
        tracks.sort();
        tracks
    }

    /// Indicates whether a track of the provided [`TrackType`] is being
    /// published.
    #[must_use]
    pub fn is_publishing(&self, track_type: TrackType) -> bool {
        lock(&self.inner)
            .senders
            .get(&track_type)
            .map_or(false, |s| s.track.is_some())
    }

    /// Describes the published tracks as [`TrackInfo`]s announced to the SFU.
    #[must_use]
    pub fn track_infos(&self, munging: Munging) -> Vec<TrackInfo> {
        let inner = lock(&self.inner);
        let mut infos: Vec<_> = inner
            .senders
            .iter()
            .filter_map(|(track_type, sender)| {
                let track = sender.track.as_ref()?;
                let is_audio = matches!(
                    track_type,
                    TrackType::Audio | TrackType::ScreenShareAudio
                );
                Some(TrackInfo {
                    track_id: track.id(),
                    track_type: *track_type,
                    mid: sender.transceiver.mid(),
                    layers: if track_type.is_video() {
                        simulcast::video_layers(
                            &sender.transceiver.encodings(),
                        )
                    } else {
                        Vec::new()
                    },
                    dtx: is_audio && munging.dtx,
                    red: is_audio && munging.red,
                    muted: !track.is_enabled(),
                })
            })
            .collect();
        infos.sort_by_key(|i| i.track_type);
        infos
    }

    /// Marks ICE to be restarted on the next negotiation.
    #[inline]
    pub fn restart_ice(&self) {
        self.peer.restart_ice();
    }

    /// Stops emitting [`PeerEvent::IceCandidateDiscovered`]s.
    #[inline]
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes emitting [`PeerEvent::IceCandidateDiscovered`]s.
    #[inline]
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Indicates whether this [`PeerConnection`] is paused.
    #[inline]
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Closes this [`PeerConnection`], stopping its [`Transceiver`]s.
    ///
    /// Published tracks are left intact.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        drop(inner.events_task.take());
        inner.subs.clear();
        for sender in inner.senders.values() {
            sender.transceiver.stop();
        }
        inner.senders.clear();
        drop(inner);

        self.peer.close();
        self.state.set(PeerConnectionState::Closed);
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if self.state.get() != PeerConnectionState::Closed {
            self.close();
        }
    }
}

/// Builds a [`TransceiverInit`] for publishing a track of the provided
/// [`TrackType`].
#[must_use]
pub fn send_only_init(
    track_type: TrackType,
    stream_id: &str,
    simulcast: bool,
) -> TransceiverInit {
    TransceiverInit {
        direction: TransceiverDirection::SendOnly,
        stream_ids: vec![stream_id.to_owned()],
        send_encodings: if track_type == TrackType::Video && simulcast {
            simulcast::default_encodings()
        } else {
            Vec::new()
        },
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
