//! Signaling of a media session with a single SFU instance and the
//! subscriber peer connection negotiated through it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, Weak,
};

use futures::{
    channel::{mpsc, oneshot},
    future,
    stream::{BoxStream, StreamExt as _},
};
use tandem_sfu_proto::{
    IceServer, IceTrickle, JoinRequest, PeerType, ReconnectDetails,
    ReconnectStrategy, SfuError, SfuEvent, SfuRequest, TrackType,
};
use tracerr::Traced;

use crate::{
    call::state::TrackHandle,
    peer::{PeerConnection, PeerError, PeerEvent},
    platform::{
        IceCandidate, RemoteStream, RtcConfiguration, SessionDescription,
    },
    rpc::{SfuChannel, SfuCredentials, SignalServer},
    utils::TaskHandle,
};

use super::{
    lock, migration, publisher, reconnect, subscriptions, Inner,
    SessionError, SessionEvent,
};

/// Outcome of a join request as reported by the SFU.
type JoinOutcome = Result<(), SfuError>;

/// Socket and signal service of a single session on a single SFU, with the
/// subscriber negotiated through them.
pub(super) struct Link {
    pub(super) channel: SfuChannel,
    pub(super) signal: SignalServer,

    /// ICE servers of the credentials this [`Link`] was opened with.
    ice_servers: Vec<IceServer>,

    subscriber: Mutex<Option<Arc<PeerConnection>>>,

    /// Queue of the subscriber offers waiting to be answered.
    offers: mpsc::UnboundedSender<String>,

    /// Pending join request.
    join: Mutex<Option<oneshot::Sender<JoinOutcome>>>,

    closed: AtomicBool,

    tasks: Mutex<Vec<TaskHandle>>,
}

impl Link {
    /// Opens a new [`Link`] to the SFU of the provided [`SfuCredentials`]
    /// and joins it, resolving once the SFU answers with its join response.
    ///
    /// The returned [`Link`] isn't made the current one.
    pub(super) async fn join(
        inner: &Arc<Inner>,
        credentials: &SfuCredentials,
        session_id: String,
        fast_reconnect: bool,
        reconnect_details: Option<ReconnectDetails>,
    ) -> Result<Arc<Self>, Traced<SessionError>> {
        let channel = SfuChannel::new(
            credentials.server.clone(),
            Arc::clone(&inner.ctx.transport_factory),
            inner.conf.rpc.clone(),
        );
        let events = channel.subscribe();
        let losses = channel.on_connection_loss();
        channel
            .connect()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;

        let service = inner
            .ctx
            .signal_factory
            .create(&credentials.server, &credentials.token);
        let signal = SignalServer::new(
            service,
            credentials.server.clone(),
            session_id.clone(),
            inner.conf.retry.clone(),
        );

        let (offers, offers_rx) = mpsc::unbounded();
        let (join_tx, join_rx) = oneshot::channel();
        let link = Arc::new(Self {
            channel,
            signal,
            ice_servers: credentials.ice_servers.clone(),
            subscriber: Mutex::new(None),
            offers,
            join: Mutex::new(Some(join_tx)),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });
        link.spawn(handle_events(
            Arc::downgrade(inner),
            Arc::downgrade(&link),
            events,
        ));
        link.spawn(answer_offers(Arc::downgrade(&link), offers_rx));
        link.spawn(watch_losses(
            Arc::downgrade(inner),
            Arc::downgrade(&link),
            losses,
        ));

        let subscriber_sdp = throwaway_offer(inner, credentials).await?;
        link.channel
            .send(&SfuRequest::Join(JoinRequest {
                token: credentials.token.clone(),
                session_id,
                subscriber_sdp,
                fast_reconnect,
                reconnect_details,
            }))
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;

        let outcome =
            tokio::time::timeout(inner.conf.call.join_timeout, join_rx).await;
        match outcome {
            Ok(Ok(Ok(()))) => Ok(link),
            Ok(Ok(Err(e))) => {
                drop(link.close(false));
                Err(tracerr::new!(SessionError::JoinRejected(e)))
            }
            Ok(Err(_)) | Err(_) => {
                drop(link.close(false));
                Err(tracerr::new!(SessionError::JoinTimeout))
            }
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: future::Future<Output = ()> + Send + 'static,
    {
        let (fut, abort) = future::abortable(fut);
        drop(tokio::spawn(fut));
        lock(&self.tasks).push(abort.into());
    }

    /// Subscriber of this [`Link`], once the SFU has answered the join
    /// request.
    pub(super) fn subscriber(&self) -> Option<Arc<PeerConnection>> {
        lock(&self.subscriber).clone()
    }

    /// Indicates whether this [`Link`] is closed.
    #[inline]
    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the socket and stops all the tasks of this [`Link`].
    ///
    /// Returns the subscriber if `keep_subscriber` is set, closing it
    /// otherwise.
    pub(super) fn close(
        &self,
        keep_subscriber: bool,
    ) -> Option<Arc<PeerConnection>> {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.tasks).clear();
        drop(lock(&self.join).take());
        self.channel.close();

        let subscriber = lock(&self.subscriber).take()?;
        if keep_subscriber {
            Some(subscriber)
        } else {
            subscriber.close();
            None
        }
    }

    fn resolve_join(&self, outcome: JoinOutcome) -> bool {
        match lock(&self.join).take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    log::debug!("Join outcome dropped: join was cancelled");
                }
                true
            }
            None => false,
        }
    }

    /// Creates the subscriber of this [`Link`] unless it exists already.
    fn ensure_subscriber(
        self: &Arc<Self>,
        inner: &Arc<Inner>,
        ice_servers: Vec<IceServer>,
    ) -> Result<Arc<PeerConnection>, Traced<SessionError>> {
        if let Some(subscriber) = self.subscriber() {
            return Ok(subscriber);
        }
        let config = RtcConfiguration {
            ice_servers: if ice_servers.is_empty() {
                self.ice_servers.clone()
            } else {
                ice_servers
            },
        };
        let subscriber = Arc::new(
            PeerConnection::new(
                PeerType::Subscriber,
                inner.ctx.peer_factory.as_ref(),
                &config,
            )
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?,
        );
        let events = subscriber.subscribe();
        *lock(&self.subscriber) = Some(Arc::clone(&subscriber));
        self.spawn(handle_subscriber_events(
            Arc::downgrade(inner),
            Arc::downgrade(self),
            Arc::downgrade(&subscriber),
            events,
        ));
        Ok(subscriber)
    }
}

/// Creates an offer of a temporary receive-only peer connection, which is
/// only used to advertise the receiving capabilities in a join request.
async fn throwaway_offer(
    inner: &Inner,
    credentials: &SfuCredentials,
) -> Result<String, Traced<SessionError>> {
    let peer = inner
        .ctx
        .peer_factory
        .create_peer_connection(&RtcConfiguration {
            ice_servers: credentials.ice_servers.clone(),
        })
        .map_err(tracerr::map_from_and_wrap!(=> PeerError))
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    let offer = peer.create_offer(false).await;
    peer.close();
    offer
        .map(|o| o.sdp)
        .map_err(tracerr::map_from_and_wrap!(=> PeerError))
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))
}

/// Processes the [`SfuEvent`]s of a [`Link`] one by one.
async fn handle_events(
    inner: Weak<Inner>,
    link: Weak<Link>,
    mut events: BoxStream<'static, SfuEvent>,
) {
    while let Some(event) = events.next().await {
        let (inner, link) = match (inner.upgrade(), link.upgrade()) {
            (Some(inner), Some(link)) => (inner, link),
            _ => break,
        };
        handle_event(&inner, &link, event).await;
    }
}

async fn handle_event(inner: &Arc<Inner>, link: &Arc<Link>, event: SfuEvent) {
    let is_current = inner.is_current(link);
    match event {
        SfuEvent::SubscriberOffer { sdp, .. } => {
            if link.offers.unbounded_send(sdp).is_err() {
                log::debug!("Subscriber offer dropped: link is closed");
            }
        }
        SfuEvent::PublisherAnswer { .. } => {
            log::debug!("Ignoring out-of-band publisher answer");
        }
        SfuEvent::IceTrickle(trickle) => {
            add_remote_candidate(inner, link, trickle).await;
        }
        SfuEvent::ChangePublishQuality { video_senders } => {
            publisher::change_publish_quality(inner, &video_senders);
        }
        SfuEvent::JoinResponse { ref ice_servers, .. } => {
            let ice_servers = ice_servers.clone();
            apply(inner, event).await;
            let outcome = match link.ensure_subscriber(inner, ice_servers) {
                Ok(_) => Ok(()),
                Err(e) => {
                    log::error!("Failed to create subscriber: {}", e);
                    Err(SfuError {
                        code: 0,
                        message: e.to_string(),
                        should_retry: false,
                    })
                }
            };
            if !link.resolve_join(outcome) {
                log::debug!("Join response without a pending join");
            }
            if is_current {
                subscriptions::refresh(inner);
            }
        }
        SfuEvent::Error {
            error,
            reconnect_strategy,
        } => {
            log::warn!(
                "SFU error (strategy {}): {}",
                reconnect_strategy,
                error,
            );
            if link.resolve_join(Err(error.clone())) || !is_current {
                return;
            }
            let inner = Arc::clone(inner);
            match reconnect_strategy {
                ReconnectStrategy::Fast => {
                    inner.scope.clone().spawn(reconnect::fast(inner));
                }
                ReconnectStrategy::Rejoin => {
                    inner.scope.clone().spawn(reconnect::full(inner));
                }
                ReconnectStrategy::Migrate => {
                    inner.scope.clone().spawn(migration::migrate(inner));
                }
                ReconnectStrategy::Disconnect => {
                    let err = SessionError::Disconnected(error);
                    inner.fail(tracerr::new!(err));
                }
                ReconnectStrategy::Unspecified => {}
            }
        }
        SfuEvent::GoAway { reason } => {
            log::info!("SFU {} goes away: {}", link.signal.edge_name(), reason);
            if is_current {
                let inner = Arc::clone(inner);
                inner.scope.clone().spawn(migration::migrate(inner));
            }
        }
        SfuEvent::IceRestart { peer_type } => {
            if is_current {
                restart_ice(inner, link, peer_type);
            }
        }
        SfuEvent::CallEnded { reason } => {
            log::info!("Call ended by SFU: {}", reason);
            apply(inner, event).await;
            inner.notify(SessionEvent::Ended);
        }
        SfuEvent::ParticipantMigrationComplete => {
            log::debug!("Migration to {} completed", link.signal.edge_name());
        }
        SfuEvent::CallGrantsUpdated { .. } => {
            apply(inner, event).await;
            publisher::unpublish_revoked(inner);
        }
        SfuEvent::ParticipantJoined { .. }
        | SfuEvent::ParticipantLeft { .. }
        | SfuEvent::ParticipantUpdated { .. }
        | SfuEvent::TrackPublished { .. }
        | SfuEvent::TrackUnpublished { .. } => {
            apply(inner, event).await;
            if is_current {
                subscriptions::refresh(inner);
            }
        }
        SfuEvent::ConnectionQualityChanged { .. }
        | SfuEvent::AudioLevelChanged { .. }
        | SfuEvent::DominantSpeakerChanged { .. }
        | SfuEvent::HealthCheckResponse { .. }
        | SfuEvent::PinsChanged { .. } => apply(inner, event).await,
    }
}

async fn apply(inner: &Inner, event: SfuEvent) {
    if let Err(e) = inner.store.apply(event).await {
        log::debug!("SFU event dropped: {}", e);
    }
}

/// Routes a remote ICE candidate to the peer it belongs to.
async fn add_remote_candidate(
    inner: &Inner,
    link: &Link,
    trickle: IceTrickle,
) {
    let candidate: IceCandidate =
        match serde_json::from_str(&trickle.ice_candidate) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Malformed ICE candidate dropped: {}", e);
                return;
            }
        };
    let peer = match trickle.peer_type {
        PeerType::Publisher => inner.publisher(),
        PeerType::Subscriber => link.subscriber(),
    };
    match peer {
        Some(peer) => {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                log::warn!(
                    "Failed to add ICE candidate to {} peer: {}",
                    trickle.peer_type,
                    e,
                );
            }
        }
        None => log::debug!(
            "ICE candidate for missing {} peer dropped",
            trickle.peer_type,
        ),
    }
}

/// Restarts ICE of the provided peer as requested by the SFU.
fn restart_ice(inner: &Arc<Inner>, link: &Arc<Link>, peer_type: PeerType) {
    match peer_type {
        PeerType::Publisher => publisher::renegotiate(inner, true),
        PeerType::Subscriber => {
            let link = Arc::clone(link);
            inner.scope.spawn(async move {
                let res = link
                    .signal
                    .ice_restart(PeerType::Subscriber, || !link.is_closed())
                    .await;
                if let Err(e) = res {
                    log::warn!("Failed to restart subscriber ICE: {}", e);
                }
            });
        }
    }
}

/// Answers the subscriber offers of a [`Link`] one by one.
async fn answer_offers(
    link: Weak<Link>,
    mut offers: mpsc::UnboundedReceiver<String>,
) {
    while let Some(sdp) = offers.next().await {
        let link = match link.upgrade() {
            Some(link) => link,
            None => break,
        };
        let subscriber = match link.subscriber() {
            Some(s) => s,
            None => {
                log::warn!("Subscriber offer received before join response");
                continue;
            }
        };
        if let Err(e) = answer_offer(&link, &subscriber, sdp).await {
            log::error!("Failed to answer subscriber offer: {}", e);
        }
    }
}

async fn answer_offer(
    link: &Link,
    subscriber: &PeerConnection,
    sdp: String,
) -> Result<(), Traced<SessionError>> {
    let _negotiation = subscriber.negotiation_lock().await;
    subscriber
        .set_remote_description(SessionDescription::offer(sdp))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    let answer = subscriber
        .create_answer()
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    subscriber
        .set_local_description(answer.clone())
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    link.signal
        .send_answer(PeerType::Subscriber, answer.sdp, || !link.is_closed())
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))
}

/// Starts a full reconnect once the socket of the current [`Link`] is lost,
/// unless the network is known to be unavailable.
async fn watch_losses(
    inner: Weak<Inner>,
    link: Weak<Link>,
    mut losses: BoxStream<'static, ()>,
) {
    while losses.next().await.is_some() {
        let (inner, link) = match (inner.upgrade(), link.upgrade()) {
            (Some(inner), Some(link)) => (inner, link),
            _ => break,
        };
        if !inner.is_current(&link) {
            continue;
        }
        if lock(&inner.disconnected_at).is_some() {
            log::debug!("SFU socket lost while network is unavailable");
            continue;
        }
        log::warn!("SFU socket lost, reconnecting");
        inner.scope.clone().spawn(reconnect::full(Arc::clone(&inner)));
    }
}

/// Handles the [`PeerEvent`]s of the subscriber of a [`Link`].
async fn handle_subscriber_events(
    inner: Weak<Inner>,
    link: Weak<Link>,
    subscriber: Weak<PeerConnection>,
    mut events: BoxStream<'static, PeerEvent>,
) {
    while let Some(event) = events.next().await {
        let (inner, link) = match (inner.upgrade(), link.upgrade()) {
            (Some(inner), Some(link)) => (inner, link),
            _ => break,
        };
        match event {
            PeerEvent::IceCandidateDiscovered { candidate, .. } => {
                send_local_candidate(
                    &inner,
                    &link,
                    PeerType::Subscriber,
                    &candidate,
                );
            }
            PeerEvent::StreamAdded { stream, .. } => {
                register_stream(&inner, stream).await;
            }
            PeerEvent::StreamRemoved { stream_id, .. } => {
                unregister_stream(&inner, &stream_id).await;
            }
            PeerEvent::ConnectionStateChanged { state, .. } => {
                if inner.is_current(&link) {
                    reconnect::on_peer_state(
                        &inner,
                        subscriber.clone(),
                        state,
                    );
                }
            }
            PeerEvent::NegotiationNeeded { .. } => {}
        }
    }
}

/// Sends a locally discovered ICE candidate through the provided [`Link`].
pub(super) fn send_local_candidate(
    inner: &Inner,
    link: &Arc<Link>,
    peer_type: PeerType,
    candidate: &IceCandidate,
) {
    let candidate = match serde_json::to_string(candidate) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to encode ICE candidate: {}", e);
            return;
        }
    };
    let link = Arc::clone(link);
    inner.scope.spawn(async move {
        let res = link
            .signal
            .ice_trickle(peer_type, candidate, || !link.is_closed())
            .await;
        if let Err(e) = res {
            log::warn!("Failed to send {} ICE candidate: {}", peer_type, e);
        }
    });
}

/// Parses a remote stream ID in `{track_lookup_prefix}:{track_type}`
/// format.
fn parse_stream_id(id: &str) -> Option<(&str, TrackType)> {
    let (prefix, track_type) = id.rsplit_once(':')?;
    let track_type = match track_type {
        "audio" => TrackType::Audio,
        "video" => TrackType::Video,
        "screen_share" => TrackType::ScreenShare,
        "screen_share_audio" => TrackType::ScreenShareAudio,
        _ => return None,
    };
    Some((prefix, track_type))
}

async fn register_stream(inner: &Inner, stream: RemoteStream) {
    let (prefix, track_type) = match parse_stream_id(&stream.id) {
        Some((prefix, tt)) => (prefix.to_owned(), tt),
        None => {
            log::warn!("Remote stream with unknown ID: {}", stream.id);
            return;
        }
    };
    let track = match stream.tracks.into_iter().next() {
        Some(track) => TrackHandle(track),
        None => return,
    };
    let res = inner
        .store
        .update(move |s| s.attach_track(&prefix, track_type, track))
        .await;
    if let Err(e) = res {
        log::debug!("Remote stream dropped: {}", e);
    }
}

async fn unregister_stream(inner: &Inner, stream_id: &str) {
    let (prefix, track_type) = match parse_stream_id(stream_id) {
        Some((prefix, tt)) => (prefix.to_owned(), tt),
        None => return,
    };
    let res = inner
        .store
        .update(move |s| s.detach_track(&prefix, track_type))
        .await;
    if let Err(e) = res {
        log::debug!("Remote stream removal dropped: {}", e);
    }
}
