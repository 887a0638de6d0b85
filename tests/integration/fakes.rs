//! Scripted implementations of the platform primitives, the SFU and the
//! coordinator.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::{
    channel::mpsc,
    future,
    stream::{self, BoxStream, StreamExt as _},
};
use tandem::{
    conf::{Conf, RetryPolicy},
    coordinator::{
        CallResponse, CoordinatorApi, CoordinatorError, JoinCallRequest,
        JoinCallResponse, OwnCapability, UserResponse,
    },
    platform::{
        CameraPosition, IceCandidate, MediaKind, MediaSource,
        MediaSourceError, MediaStreamTrack, NetworkMonitor, NetworkStatus,
        PeerConnectionFactory, PeerConnectionState, RpcTransport,
        RpcTransportFactory, RtcConfiguration, RtcEvent, RtcPeerConnection,
        RtcPeerConnectionError, RtpEncoding, SessionDescription, Transceiver,
        TransceiverInit, TransportError, TransportState,
    },
    rpc::{
        SfuCredentials, SfuServer, SignalError, SignalService,
        SignalServiceFactory,
    },
    Client, Context,
};
use tandem_sfu_proto::{
    signal::{
        IceRestartRequest, SendAnswerRequest, SetPublisherRequest,
        SetPublisherResponse, UpdateMuteStatesRequest,
        UpdateSubscriptionsRequest,
    },
    CallState, IceTrickle, JoinRequest, Participant, ParticipantCount,
    SfuEvent, SfuRequest, TrackSubscriptionDetails,
};
use tracerr::Traced;
use url::Url;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// [`Conf`] with the delays shrunk to keep the tests fast.
pub fn conf() -> Conf {
    let policy = RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(100),
        multiplier: 1.0,
        max_delay: Duration::from_millis(100),
        randomization_factor: 0.0,
    };
    let mut conf = Conf::default();
    conf.call.join_timeout = Duration::from_secs(2);
    conf.call.join_retries = 1;
    conf.reconnect.fast_reconnect_window = Duration::from_secs(1);
    conf.reconnect.settle_delay = Duration::from_millis(100);
    conf.reconnect.max_full_reconnect_attempts = 3;
    conf.retry.fast = policy.clone();
    conf.retry.persistent = policy;
    conf
}

/// Polls the provided condition until it holds, panicking if it doesn't
/// within a few seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting until {}", what);
}

/// Remote participant record as the SFU sends it.
pub fn participant(session_id: &str) -> Participant {
    Participant {
        user_id: format!("user-{}", session_id),
        session_id: session_id.to_owned(),
        track_lookup_prefix: format!("prefix-{}", session_id),
        ..Participant::default()
    }
}

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    pub stopped: AtomicBool,
}

impl MediaStreamTrack for FakeTrack {
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

/// Counts the captured tracks.
#[derive(Default)]
pub struct FakeMediaSource {
    pub audio: AtomicUsize,
    pub video: AtomicUsize,
    pub screens: AtomicUsize,
}

impl FakeMediaSource {
    fn track(
        counter: &AtomicUsize,
        name: &str,
        kind: MediaKind,
    ) -> Arc<dyn MediaStreamTrack> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(FakeTrack {
            id: format!("{}-{}", name, n),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn create_audio_track(
        &self,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
        Ok(Self::track(&self.audio, "mic", MediaKind::Audio))
    }

    async fn create_video_track(
        &self,
        position: CameraPosition,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
        let name = format!("camera-{}", position);
        Ok(Self::track(&self.video, &name, MediaKind::Video))
    }

    async fn create_screenshare_track(
        &self,
    ) -> Result<Arc<dyn MediaStreamTrack>, Traced<MediaSourceError>> {
        Ok(Self::track(&self.screens, "screen", MediaKind::Video))
    }
}

pub struct FakeTransceiver {
    encodings: Mutex<Vec<RtpEncoding>>,
}

impl Transceiver for FakeTransceiver {
    fn mid(&self) -> Option<String> {
        Some("0".into())
    }

    fn encodings(&self) -> Vec<RtpEncoding> {
        lock(&self.encodings).clone()
    }

    fn set_encodings(
        &self,
        encodings: Vec<RtpEncoding>,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        *lock(&self.encodings) = encodings;
        Ok(())
    }

    fn replace_track(&self, _: Option<Arc<dyn MediaStreamTrack>>) {}

    fn stop(&self) {}
}

/// Peer connection recording what the orchestrator does with it.
pub struct FakePeer {
    pub id: usize,
    state: Mutex<PeerConnectionState>,
    subs: Mutex<Vec<mpsc::UnboundedSender<RtcEvent>>>,
    pub remote_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<(IceCandidate, bool)>>,
    pub ice_restarts: AtomicUsize,
    pub transceivers: AtomicUsize,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_sdps(&self) -> Vec<String> {
        lock(&self.remote_descriptions)
            .iter()
            .map(|d| d.sdp.clone())
            .collect()
    }

    /// Added remote candidates, each with an indication whether the remote
    /// description had been set before it.
    pub fn candidates(&self) -> Vec<(String, bool)> {
        lock(&self.candidates)
            .iter()
            .map(|(c, has_remote)| (c.candidate.clone(), *has_remote))
            .collect()
    }

    /// Changes the state of this peer, notifying the orchestrator.
    pub fn set_state(&self, state: PeerConnectionState) {
        *lock(&self.state) = state;
        self.emit(RtcEvent::ConnectionStateChanged(state));
    }

    fn emit(&self, event: RtcEvent) {
        lock(&self.subs).retain(|s| s.unbounded_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl RtcPeerConnection for FakePeer {
    async fn create_offer(
        &self,
        _: bool,
    ) -> Result<SessionDescription, Traced<RtcPeerConnectionError>> {
        Ok(SessionDescription::offer(format!("offer-{}", self.id)))
    }

    async fn create_answer(
        &self,
    ) -> Result<SessionDescription, Traced<RtcPeerConnectionError>> {
        Ok(SessionDescription::answer(format!("answer-{}", self.id)))
    }

    async fn set_local_description(
        &self,
        _: SessionDescription,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        lock(&self.remote_descriptions).push(desc);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Traced<RtcPeerConnectionError>> {
        let has_remote = !lock(&self.remote_descriptions).is_empty();
        lock(&self.candidates).push((candidate, has_remote));
        Ok(())
    }

    fn add_transceiver(
        &self,
        _: Arc<dyn MediaStreamTrack>,
        init: TransceiverInit,
    ) -> Result<Arc<dyn Transceiver>, Traced<RtcPeerConnectionError>> {
        let _ = self.transceivers.fetch_add(1, Ordering::SeqCst);
        self.emit(RtcEvent::NegotiationNeeded);
        Ok(Arc::new(FakeTransceiver {
            encodings: Mutex::new(init.send_encodings),
        }))
    }

    fn restart_ice(&self) {
        let _ = self.ice_restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_state(&self) -> PeerConnectionState {
        *lock(&self.state)
    }

    fn subscribe(&self) -> BoxStream<'static, RtcEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.subs).push(tx);
        Box::pin(rx)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.subs).clear();
    }
}

/// Creates [`FakePeer`]s in the configured initial state.
pub struct FakePeerFactory {
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
    initial_state: Mutex<PeerConnectionState>,
}

impl Default for FakePeerFactory {
    fn default() -> Self {
        Self {
            peers: Mutex::new(Vec::new()),
            initial_state: Mutex::new(PeerConnectionState::Connected),
        }
    }
}

impl FakePeerFactory {
    pub fn set_initial_state(&self, state: PeerConnectionState) {
        *lock(&self.initial_state) = state;
    }

    pub fn count(&self) -> usize {
        lock(&self.peers).len()
    }

    /// Peers created since the provided count which are still open.
    pub fn open_since(&self, count: usize) -> Vec<Arc<FakePeer>> {
        lock(&self.peers)
            .iter()
            .skip(count)
            .filter(|p| !p.is_closed())
            .cloned()
            .collect()
    }

    /// Peers which have been added a transceiver, i.e. publishers.
    pub fn publishers(&self) -> Vec<Arc<FakePeer>> {
        lock(&self.peers)
            .iter()
            .filter(|p| p.transceivers.load(Ordering::SeqCst) > 0)
            .cloned()
            .collect()
    }
}

impl PeerConnectionFactory for FakePeerFactory {
    fn create_peer_connection(
        &self,
        _: &RtcConfiguration,
    ) -> Result<Arc<dyn RtcPeerConnection>, Traced<RtcPeerConnectionError>>
    {
        let mut peers = lock(&self.peers);
        let peer = Arc::new(FakePeer {
            id: peers.len(),
            state: Mutex::new(*lock(&self.initial_state)),
            subs: Mutex::new(Vec::new()),
            remote_descriptions: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            ice_restarts: AtomicUsize::new(0),
            transceivers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        peers.push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Signal service of a [`FakeSfu`].
pub struct FakeSignal {
    edge_name: String,
    pub publisher_offers: Mutex<Vec<SetPublisherRequest>>,
    publisher_delay: Mutex<Duration>,
    pub subscriptions: Mutex<Vec<Vec<TrackSubscriptionDetails>>>,
    pub subscription_attempts: AtomicUsize,
    fail_subscriptions: AtomicBool,
    pub mute_states: Mutex<Vec<UpdateMuteStatesRequest>>,
}

impl FakeSignal {
    fn new(edge_name: &str) -> Self {
        Self {
            edge_name: edge_name.to_owned(),
            publisher_offers: Mutex::new(Vec::new()),
            publisher_delay: Mutex::new(Duration::from_millis(0)),
            subscriptions: Mutex::new(Vec::new()),
            subscription_attempts: AtomicUsize::new(0),
            fail_subscriptions: AtomicBool::new(false),
            mute_states: Mutex::new(Vec::new()),
        }
    }

    /// Delays the answers to the publisher offers.
    pub fn delay_publisher_answers(&self, delay: Duration) {
        *lock(&self.publisher_delay) = delay;
    }

    /// Makes the subscription updates fail with a transport error.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    pub fn last_subscriptions(&self) -> Option<Vec<TrackSubscriptionDetails>> {
        lock(&self.subscriptions).last().cloned()
    }
}

#[async_trait]
impl SignalService for FakeSignal {
    async fn set_publisher(
        &self,
        req: SetPublisherRequest,
    ) -> Result<SetPublisherResponse, Traced<SignalError>> {
        let session_id = req.session_id.clone();
        lock(&self.publisher_offers).push(req);
        let delay = *lock(&self.publisher_delay);
        tokio::time::sleep(delay).await;
        Ok(SetPublisherResponse {
            sdp: format!("answer-{}", self.edge_name),
            session_id,
            ice_restart: false,
            error: None,
        })
    }

    async fn send_answer(
        &self,
        _: SendAnswerRequest,
    ) -> Result<(), Traced<SignalError>> {
        Ok(())
    }

    async fn ice_trickle(
        &self,
        _: IceTrickle,
    ) -> Result<(), Traced<SignalError>> {
        Ok(())
    }

    async fn update_subscriptions(
        &self,
        req: UpdateSubscriptionsRequest,
    ) -> Result<(), Traced<SignalError>> {
        let _ = self.subscription_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(tracerr::new!(SignalError::Transport(
                "unavailable".into()
            )));
        }
        lock(&self.subscriptions).push(req.tracks);
        Ok(())
    }

    async fn update_mute_states(
        &self,
        req: UpdateMuteStatesRequest,
    ) -> Result<(), Traced<SignalError>> {
        lock(&self.mute_states).push(req);
        Ok(())
    }

    async fn ice_restart(
        &self,
        _: IceRestartRequest,
    ) -> Result<(), Traced<SignalError>> {
        Ok(())
    }
}

/// Socket of a [`FakeSfu`].
pub struct FakeTransport {
    sfu: Weak<FakeSfu>,
    subs: Mutex<Vec<mpsc::UnboundedSender<SfuEvent>>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SfuEvent) {
        lock(&self.subs).retain(|s| s.unbounded_send(event.clone()).is_ok());
    }
}

impl RpcTransport for FakeTransport {
    fn on_message(&self) -> BoxStream<'static, SfuEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.subs).push(tx);
        Box::pin(rx)
    }

    fn send(&self, msg: &SfuRequest) -> Result<(), Traced<TransportError>> {
        if self.is_closed() {
            return Err(tracerr::new!(TransportError::ClosedSocket));
        }
        let sfu = match self.sfu.upgrade() {
            Some(sfu) => sfu,
            None => return Err(tracerr::new!(TransportError::ClosedSocket)),
        };
        match msg {
            SfuRequest::Join(req) => self.emit(sfu.on_join(req.clone())),
            SfuRequest::HealthCheck => {
                self.emit(SfuEvent::HealthCheckResponse {
                    participant_count: sfu.count(),
                });
            }
            SfuRequest::LeaveCall { .. } => {
                let _ = sfu.leaves.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn on_state_change(&self) -> BoxStream<'static, TransportState> {
        Box::pin(
            stream::once(future::ready(TransportState::Open))
                .chain(stream::pending()),
        )
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scripted SFU instance.
pub struct FakeSfu {
    pub edge_name: String,
    pub joins: Mutex<Vec<JoinRequest>>,
    pub leaves: AtomicUsize,
    pub signal: Arc<FakeSignal>,
    participants: Mutex<Vec<Participant>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeSfu {
    fn new(edge_name: &str) -> Self {
        Self {
            edge_name: edge_name.to_owned(),
            joins: Mutex::new(Vec::new()),
            leaves: AtomicUsize::new(0),
            signal: Arc::new(FakeSignal::new(edge_name)),
            participants: Mutex::new(Vec::new()),
            transports: Mutex::new(Vec::new()),
        }
    }

    pub fn server(edge_name: &str) -> SfuServer {
        let url = |s: String| Url::parse(&s).unwrap();
        SfuServer {
            edge_name: edge_name.to_owned(),
            url: url(format!("https://{}.sfu.test/twirp", edge_name)),
            ws_endpoint: url(format!("wss://{}.sfu.test/ws", edge_name)),
        }
    }

    /// Participants reported in the join responses.
    pub fn set_participants(&self, participants: Vec<Participant>) {
        *lock(&self.participants) = participants;
    }

    pub fn last_join(&self) -> Option<JoinRequest> {
        lock(&self.joins).last().cloned()
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        lock(&self.transports).clone()
    }

    /// Sends the provided event over the most recent open socket.
    pub fn emit(&self, event: SfuEvent) {
        let transport = lock(&self.transports)
            .iter()
            .rev()
            .find(|t| !t.is_closed())
            .cloned()
            .unwrap_or_else(|| panic!("no open socket to {}", self.edge_name));
        transport.emit(event);
    }

    fn count(&self) -> ParticipantCount {
        ParticipantCount {
            total: lock(&self.participants).len() as u32,
            anonymous: 0,
        }
    }

    fn on_join(&self, req: JoinRequest) -> SfuEvent {
        let reconnected = req.fast_reconnect;
        lock(&self.joins).push(req);
        let participants = lock(&self.participants).clone();
        let participant_count = ParticipantCount {
            total: participants.len() as u32,
            anonymous: 0,
        };
        SfuEvent::JoinResponse {
            call_state: CallState {
                participants,
                started_at: None,
                participant_count,
                pins: Vec::new(),
            },
            reconnected,
            fast_reconnect_deadline_seconds: 0,
            ice_servers: Vec::new(),
        }
    }
}

/// Every [`FakeSfu`] by its edge name, connected to by host.
#[derive(Default)]
pub struct FakeSfus(Mutex<HashMap<String, Arc<FakeSfu>>>);

impl FakeSfus {
    pub fn get(&self, edge_name: &str) -> Arc<FakeSfu> {
        Arc::clone(
            lock(&self.0)
                .entry(edge_name.to_owned())
                .or_insert_with(|| Arc::new(FakeSfu::new(edge_name))),
        )
    }
}

#[async_trait]
impl RpcTransportFactory for FakeSfus {
    async fn connect(
        &self,
        url: Url,
    ) -> Result<Arc<dyn RpcTransport>, Traced<TransportError>> {
        let edge_name = url
            .host_str()
            .and_then(|h| h.split('.').next())
            .unwrap_or_default();
        let sfu = self.get(edge_name);
        let transport = Arc::new(FakeTransport {
            sfu: Arc::downgrade(&sfu),
            subs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        lock(&sfu.transports).push(Arc::clone(&transport));
        Ok(transport)
    }
}

impl SignalServiceFactory for FakeSfus {
    fn create(&self, server: &SfuServer, _: &str) -> Arc<dyn SignalService> {
        self.get(&server.edge_name).signal.clone()
    }
}

/// Coordinator assigning the configured SFU edge.
pub struct FakeCoordinator {
    pub joins: Mutex<Vec<JoinCallRequest>>,
    edge_name: Mutex<String>,
    capabilities: Mutex<Vec<OwnCapability>>,
    failure: Mutex<Option<CoordinatorError>>,
    pub accepts: AtomicUsize,
    pub rejects: AtomicUsize,
}

impl Default for FakeCoordinator {
    fn default() -> Self {
        Self {
            joins: Mutex::new(Vec::new()),
            edge_name: Mutex::new("sfu-1".into()),
            capabilities: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            accepts: AtomicUsize::new(0),
            rejects: AtomicUsize::new(0),
        }
    }
}

impl FakeCoordinator {
    pub fn assign_edge(&self, edge_name: &str) {
        *lock(&self.edge_name) = edge_name.to_owned();
    }

    pub fn grant(&self, capabilities: Vec<OwnCapability>) {
        *lock(&self.capabilities) = capabilities;
    }

    pub fn fail_with(&self, err: CoordinatorError) {
        *lock(&self.failure) = Some(err);
    }

    pub fn join_count(&self) -> usize {
        lock(&self.joins).len()
    }
}

fn call_response(call_type: &str, call_id: &str) -> CallResponse {
    CallResponse {
        cid: format!("{}:{}", call_type, call_id),
        call_type: call_type.to_owned(),
        id: call_id.to_owned(),
        custom: serde_json::Map::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        starts_at: None,
        ended_at: None,
        backstage: false,
        recording: false,
        transcribing: false,
        blocked_user_ids: Vec::new(),
        settings: Default::default(),
        session: None,
        egress: Default::default(),
        created_by: UserResponse::default(),
        team: None,
    }
}

#[async_trait]
impl CoordinatorApi for FakeCoordinator {
    async fn join_call(
        &self,
        req: JoinCallRequest,
    ) -> Result<JoinCallResponse, Traced<CoordinatorError>> {
        let call = call_response(&req.call_type, &req.call_id);
        lock(&self.joins).push(req);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(err) = lock(&self.failure).clone() {
            return Err(tracerr::new!(err));
        }
        Ok(JoinCallResponse {
            call,
            members: Vec::new(),
            own_capabilities: lock(&self.capabilities).clone(),
            credentials: SfuCredentials {
                server: FakeSfu::server(&lock(&self.edge_name)),
                token: "token".into(),
                ice_servers: Vec::new(),
            },
        })
    }

    async fn accept_call(
        &self,
        _: String,
        _: String,
    ) -> Result<(), Traced<CoordinatorError>> {
        let _ = self.accepts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject_call(
        &self,
        _: String,
        _: String,
    ) -> Result<(), Traced<CoordinatorError>> {
        let _ = self.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Network reachability switched by the test.
#[derive(Default)]
pub struct FakeNetwork(Mutex<Vec<mpsc::UnboundedSender<NetworkStatus>>>);

impl FakeNetwork {
    pub fn set(&self, status: NetworkStatus) {
        lock(&self.0).retain(|s| s.unbounded_send(status).is_ok());
    }
}

impl NetworkMonitor for FakeNetwork {
    fn subscribe(&self) -> BoxStream<'static, NetworkStatus> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.0).push(tx);
        Box::pin(rx)
    }
}

/// [`Client`] wired to the fakes.
pub struct Harness {
    pub coordinator: Arc<FakeCoordinator>,
    pub peers: Arc<FakePeerFactory>,
    pub media: Arc<FakeMediaSource>,
    pub network: Arc<FakeNetwork>,
    pub sfus: Arc<FakeSfus>,
    pub client: Client,
}

impl Harness {
    pub fn new() -> Self {
        let coordinator = Arc::new(FakeCoordinator::default());
        let peers = Arc::new(FakePeerFactory::default());
        let media = Arc::new(FakeMediaSource::default());
        let network = Arc::new(FakeNetwork::default());
        let sfus = Arc::new(FakeSfus::default());
        let ctx = Context {
            coordinator: coordinator.clone(),
            peer_factory: peers.clone(),
            media_source: media.clone(),
            transport_factory: sfus.clone(),
            signal_factory: sfus.clone(),
            network: network.clone(),
        };
        Self {
            client: Client::new(ctx, conf()),
            coordinator,
            peers,
            media,
            network,
            sfus,
        }
    }

    pub fn sfu(&self, edge_name: &str) -> Arc<FakeSfu> {
        self.sfus.get(edge_name)
    }
}
