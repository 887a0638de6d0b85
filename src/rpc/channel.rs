//! Persistent socket to a single SFU instance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::Display;
use futures::{
    channel::mpsc,
    future,
    stream::{BoxStream, StreamExt as _},
};
use tandem_reactive::ObservableCell;
use tandem_sfu_proto::{SfuEvent, SfuRequest};
use tracerr::Traced;

use crate::{
    conf,
    platform::{RpcTransport, RpcTransportFactory, TransportState},
    utils::TaskHandle,
};

use super::{
    Heartbeat, IdleTimeout, PingInterval, RpcClientError, SfuServer,
};

/// Reason of an [`SfuChannel`] being closed.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ClosedReason {
    /// Channel has never been connected.
    NeverConnected,

    /// Channel has been closed by the client.
    ClosedByClient,

    /// Connection has been lost.
    ConnectionLost,

    /// Connection couldn't be established.
    #[display(fmt = "ConnectionFailed({})", _0)]
    ConnectionFailed(String),
}

/// State of an [`SfuChannel`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum ChannelState {
    /// Connection is being established.
    Connecting,

    /// Connection is open.
    Open,

    /// Connection is closed.
    #[display(fmt = "Closed({})", _0)]
    Closed(ClosedReason),
}

struct Inner {
    /// Socket to the SFU.
    transport: Option<Arc<dyn RpcTransport>>,

    /// Connection loss detector.
    heartbeat: Option<Heartbeat>,

    /// Subscribers to the incoming [`SfuEvent`]s.
    subs: Vec<mpsc::UnboundedSender<SfuEvent>>,

    /// Subscribers of [`SfuChannel::on_connection_loss`].
    on_connection_loss_subs: Vec<mpsc::UnboundedSender<()>>,

    /// Tasks listening to the current transport.
    tasks: Vec<TaskHandle>,
}

/// Persistent socket to a single SFU instance.
///
/// Multiplexes the incoming [`SfuEvent`]s to any number of subscribers,
/// detects connection losses (socket closed by the server or idle) and
/// reports them via [`SfuChannel::on_connection_loss`].
pub struct SfuChannel {
    inner: Arc<Mutex<Inner>>,
    state: Arc<ObservableCell<ChannelState>>,
    server: SfuServer,
    transport_factory: Arc<dyn RpcTransportFactory>,
    conf: conf::Rpc,
}

impl SfuChannel {
    /// Creates a new not connected [`SfuChannel`] to the provided
    /// [`SfuServer`].
    #[must_use]
    pub fn new(
        server: SfuServer,
        transport_factory: Arc<dyn RpcTransportFactory>,
        conf: conf::Rpc,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                transport: None,
                heartbeat: None,
                subs: Vec::new(),
                on_connection_loss_subs: Vec::new(),
                tasks: Vec::new(),
            })),
            state: Arc::new(ObservableCell::new(ChannelState::Closed(
                ClosedReason::NeverConnected,
            ))),
            server,
            transport_factory,
            conf,
        }
    }

    /// [`SfuServer`] this [`SfuChannel`] targets.
    #[inline]
    #[must_use]
    pub fn server(&self) -> &SfuServer {
        &self.server
    }

    /// Current [`ChannelState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Returns a [`BoxStream`] of [`ChannelState`] changes, starting with the
    /// current one.
    #[inline]
    pub fn on_state_change(&self) -> BoxStream<'static, ChannelState> {
        self.state.subscribe()
    }

    /// Establishes the socket, replacing the previous one if any.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::CouldNotEstablish`] if the socket cannot be
    /// established, or with [`RpcClientError::ConnectTimeout`] if it's not
    /// established during the configured connect timeout.
    pub async fn connect(&self) -> Result<(), Traced<RpcClientError>> {
        self.drop_transport();
        self.state.set(ChannelState::Connecting);

        let connect = tokio::time::timeout(
            self.conf.connect_timeout,
            self.transport_factory
                .connect(self.server.ws_endpoint.clone()),
        )
        .await;
        let transport = match connect {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                let e = e.into_inner();
                self.state.set(ChannelState::Closed(
                    ClosedReason::ConnectionFailed(e.to_string()),
                ));
                return Err(tracerr::new!(RpcClientError::CouldNotEstablish(
                    e
                )));
            }
            Err(_) => {
                self.state.set(ChannelState::Closed(
                    ClosedReason::ConnectionFailed("timeout".into()),
                ));
                return Err(tracerr::new!(RpcClientError::ConnectTimeout));
            }
        };

        self.install_transport(transport);
        self.state.set(ChannelState::Open);
        log::debug!("SFU channel to {} is open", self.server.edge_name);

        Ok(())
    }

    /// Subscribes to the incoming transport messages, state changes and
    /// heartbeat of the provided [`RpcTransport`].
    fn install_transport(&self, transport: Arc<dyn RpcTransport>) {
        let heartbeat = Heartbeat::new(
            IdleTimeout(self.conf.idle_timeout),
            PingInterval(self.conf.ping_interval),
        );
        let mut on_idle = heartbeat.on_idle().fuse();
        heartbeat.start(Arc::clone(&transport));

        let mut messages = transport.on_message();
        let weak_inner = Arc::downgrade(&self.inner);
        let (pump, pump_abort) = future::abortable(async move {
            while let Some(msg) = messages.next().await {
                match weak_inner.upgrade() {
                    Some(inner) => lock(&inner)
                        .subs
                        .retain(|sub| sub.unbounded_send(msg.clone()).is_ok()),
                    None => break,
                }
            }
        });
        drop(tokio::spawn(pump));

        let mut transport_state = transport.on_state_change().fuse();
        let weak_inner = Arc::downgrade(&self.inner);
        let state = Arc::clone(&self.state);
        let (watcher, watcher_abort) = future::abortable(async move {
            loop {
                let lost = futures::select! {
                    s = transport_state.next() => match s {
                        Some(TransportState::Closed(msg)) => {
                            log::warn!("SFU socket closed: {}", msg);
                            true
                        }
                        Some(_) => false,
                        None => true,
                    },
                    _ = on_idle.next() => {
                        log::warn!("SFU socket is idle");
                        true
                    },
                };
                if lost {
                    if let Some(inner) = weak_inner.upgrade() {
                        Self::on_lost(&inner, &state);
                    }
                    break;
                }
            }
        });
        drop(tokio::spawn(watcher));

        let mut inner = lock(&self.inner);
        inner.transport = Some(transport);
        inner.heartbeat = Some(heartbeat);
        inner.tasks = vec![pump_abort.into(), watcher_abort.into()];
    }

    /// Marks the channel as lost and notifies the
    /// [`SfuChannel::on_connection_loss`] subscribers.
    fn on_lost(inner: &Mutex<Inner>, state: &ObservableCell<ChannelState>) {
        let mut inner = lock(inner);
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.stop();
        }
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
        state.set(ChannelState::Closed(ClosedReason::ConnectionLost));
        inner
            .on_connection_loss_subs
            .retain(|sub| sub.unbounded_send(()).is_ok());
    }

    /// Returns a [`BoxStream`] of all the [`SfuEvent`]s received from now
    /// on, including the ones received after reconnections.
    pub fn subscribe(&self) -> BoxStream<'static, SfuEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.inner).subs.push(tx);
        Box::pin(rx)
    }

    /// Returns a [`BoxStream`] emitting every time the connection is lost.
    pub fn on_connection_loss(&self) -> BoxStream<'static, ()> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.inner).on_connection_loss_subs.push(tx);
        Box::pin(rx)
    }

    /// Sends the provided [`SfuRequest`].
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::NotConnected`] if there is no open socket, or
    /// with [`RpcClientError::Transport`] if the socket fails to send it.
    pub fn send(&self, msg: &SfuRequest) -> Result<(), Traced<RpcClientError>> {
        let transport = lock(&self.inner)
            .transport
            .clone()
            .ok_or_else(|| tracerr::new!(RpcClientError::NotConnected))?;
        transport
            .send(msg)
            .map_err(tracerr::map_from_and_wrap!(=> RpcClientError))
    }

    /// Closes this [`SfuChannel`] without reporting a connection loss.
    pub fn close(&self) {
        self.drop_transport();
        self.state
            .set(ChannelState::Closed(ClosedReason::ClosedByClient));
    }

    fn drop_transport(&self) {
        let mut inner = lock(&self.inner);
        inner.tasks.clear();
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.stop();
        }
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
    }
}

impl Drop for SfuChannel {
    fn drop(&mut self) {
        self.drop_transport();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod spec {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures::{channel::mpsc, StreamExt as _};
    use tandem_reactive::ObservableCell;
    use tandem_sfu_proto::{ParticipantCount, SfuEvent};
    use tracerr::Traced;
    use url::Url;

    use crate::{
        conf,
        platform::{
            CloseMsg, MockRpcTransport, RpcTransport, RpcTransportFactory,
            TransportError, TransportState,
        },
        rpc::SfuServer,
    };

    use super::{ChannelState, ClosedReason, SfuChannel};

    struct Factory(Mutex<Option<MockRpcTransport>>);

    #[async_trait]
    impl RpcTransportFactory for Factory {
        async fn connect(
            &self,
            _: Url,
        ) -> Result<Arc<dyn RpcTransport>, Traced<TransportError>> {
            match self.0.lock().unwrap().take() {
                Some(t) => Ok(Arc::new(t)),
                None => Err(tracerr::new!(TransportError::CreateSocket(
                    "refused".into()
                ))),
            }
        }
    }

    fn server() -> SfuServer {
        SfuServer {
            edge_name: "sfu-1".into(),
            url: "https://sfu-1.example.com/twirp".parse().unwrap(),
            ws_endpoint: "wss://sfu-1.example.com/ws".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn multiplexes_events_to_subscribers() {
        let subs: Arc<Mutex<Vec<mpsc::UnboundedSender<SfuEvent>>>> =
            Arc::default();
        let mut transport = MockRpcTransport::new();
        let on_message_subs = Arc::clone(&subs);
        transport.expect_on_message().returning(move || {
            let (tx, rx) = mpsc::unbounded();
            on_message_subs.lock().unwrap().push(tx);
            Box::pin(rx)
        });
        transport
            .expect_on_state_change()
            .returning(|| Box::pin(futures::stream::pending()));
        transport.expect_send().returning(|_| Ok(()));
        transport.expect_close().return_const(());

        let channel = SfuChannel::new(
            server(),
            Arc::new(Factory(Mutex::new(Some(transport)))),
            conf::Rpc::default(),
        );
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();
        channel.connect().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Open);

        let event = SfuEvent::HealthCheckResponse {
            participant_count: ParticipantCount {
                total: 2,
                anonymous: 0,
            },
        };
        for tx in subs.lock().unwrap().iter() {
            tx.unbounded_send(event.clone()).unwrap();
        }

        assert_eq!(first.next().await.unwrap(), event);
        assert_eq!(second.next().await.unwrap(), event);
    }

    #[tokio::test]
    async fn reports_connection_loss_on_transport_close() {
        let transport_state =
            Arc::new(ObservableCell::new(TransportState::Open));
        let mut transport = MockRpcTransport::new();
        transport
            .expect_on_message()
            .returning(|| Box::pin(futures::stream::pending()));
        let state = Arc::clone(&transport_state);
        transport
            .expect_on_state_change()
            .returning(move || state.subscribe());
        transport.expect_send().returning(|_| Ok(()));
        transport.expect_close().return_const(());

        let channel = SfuChannel::new(
            server(),
            Arc::new(Factory(Mutex::new(Some(transport)))),
            conf::Rpc::default(),
        );
        let mut on_loss = channel.on_connection_loss();
        channel.connect().await.unwrap();

        transport_state.set(TransportState::Closed(CloseMsg::Abnormal(1006)));

        on_loss.next().await.unwrap();
        assert_eq!(
            channel.state(),
            ChannelState::Closed(ClosedReason::ConnectionLost),
        );
    }

    #[tokio::test]
    async fn fails_to_connect_when_transport_refuses() {
        let channel = SfuChannel::new(
            server(),
            Arc::new(Factory(Mutex::new(None))),
            conf::Rpc::default(),
        );

        let err = channel.connect().await.unwrap_err();
        assert!(err.to_string().starts_with("Connection failed"));
        assert!(matches!(
            channel.state(),
            ChannelState::Closed(ClosedReason::ConnectionFailed(_)),
        ));
    }

    #[tokio::test]
    async fn send_fails_when_not_connected() {
        let channel = SfuChannel::new(
            server(),
            Arc::new(Factory(Mutex::new(None))),
            conf::Rpc::default(),
        );

        channel
            .send(&tandem_sfu_proto::SfuRequest::HealthCheck)
            .unwrap_err();
    }
}
