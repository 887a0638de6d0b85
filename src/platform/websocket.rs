//! [`RpcTransport`] implementation over a WebSocket.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{
    channel::mpsc,
    stream::{BoxStream, SplitSink, SplitStream},
    SinkExt as _, StreamExt as _,
};
use tandem_reactive::ObservableCell;
use tandem_sfu_proto::{SfuEvent, SfuRequest};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{protocol::CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracerr::Traced;
use url::Url;

use super::{
    CloseMsg, RpcTransport, RpcTransportFactory, TransportError,
    TransportState,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code of an abnormally terminated connection.
const ABNORMAL_CLOSE_CODE: u16 = 1006;

struct InnerSocket {
    /// Sender of the outgoing frames into the writing task.
    outgoing: mpsc::UnboundedSender<Message>,

    /// Subscribers to the decoded incoming [`SfuEvent`]s.
    on_message_subs: Vec<mpsc::UnboundedSender<SfuEvent>>,
}

/// [`RpcTransport`] over a WebSocket connection.
pub struct WebSocketTransport {
    socket: Arc<Mutex<InnerSocket>>,
    socket_state: Arc<ObservableCell<TransportState>>,
}

impl WebSocketTransport {
    /// Connects to the provided [`Url`] and spawns the reading and writing
    /// tasks of the connection on the [`tokio`] runtime.
    ///
    /// # Errors
    ///
    /// With [`TransportError::CreateSocket`] if the connection cannot be
    /// established.
    pub async fn connect(url: Url) -> Result<Self, Traced<TransportError>> {
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                tracerr::new!(TransportError::CreateSocket(e.to_string()))
            })?;
        let (sink, stream) = ws.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded();

        let this = Self {
            socket: Arc::new(Mutex::new(InnerSocket {
                outgoing,
                on_message_subs: Vec::new(),
            })),
            socket_state: Arc::new(ObservableCell::new(TransportState::Open)),
        };
        drop(tokio::spawn(Self::write(
            sink,
            outgoing_rx,
            Arc::clone(&this.socket_state),
        )));
        drop(tokio::spawn(Self::read(
            stream,
            Arc::clone(&this.socket),
            Arc::clone(&this.socket_state),
        )));

        Ok(this)
    }

    /// Forwards the outgoing frames into the socket until it's closed.
    async fn write(
        mut sink: SplitSink<WsStream, Message>,
        mut outgoing: mpsc::UnboundedReceiver<Message>,
        state: Arc<ObservableCell<TransportState>>,
    ) {
        while let Some(msg) = outgoing.next().await {
            let is_close = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                log::error!("Failed to write into WebSocket: {}", e);
                state.set(TransportState::Closed(CloseMsg::Abnormal(
                    ABNORMAL_CLOSE_CODE,
                )));
                break;
            }
            if is_close {
                break;
            }
        }
    }

    /// Decodes the incoming frames and broadcasts them to the subscribers
    /// until the socket is closed.
    async fn read(
        mut stream: SplitStream<WsStream>,
        socket: Arc<Mutex<InnerSocket>>,
        state: Arc<ObservableCell<TransportState>>,
    ) {
        let close = loop {
            let msg = match stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    log::error!("Failed to read from WebSocket: {}", e);
                    break CloseMsg::Abnormal(ABNORMAL_CLOSE_CODE);
                }
                None => break CloseMsg::Abnormal(ABNORMAL_CLOSE_CODE),
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => {
                    match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!(
                                "{}",
                                TransportError::ParseServerMessage(
                                    e.to_string()
                                ),
                            );
                            continue;
                        }
                    }
                }
                Message::Close(frame) => break close_msg(frame),
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            match serde_json::from_str::<SfuEvent>(&text) {
                Ok(event) => lock(&socket).on_message_subs.retain(|sub| {
                    sub.unbounded_send(event.clone()).is_ok()
                }),
                Err(e) => log::error!(
                    "{}",
                    TransportError::ParseServerMessage(e.to_string()),
                ),
            }
        };
        lock(&socket).on_message_subs.clear();
        state.set(TransportState::Closed(close));
    }
}

impl RpcTransport for WebSocketTransport {
    fn on_message(&self) -> BoxStream<'static, SfuEvent> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.socket).on_message_subs.push(tx);
        Box::pin(rx)
    }

    fn send(&self, msg: &SfuRequest) -> Result<(), Traced<TransportError>> {
        if !self.socket_state.with(TransportState::can_send) {
            return Err(tracerr::new!(TransportError::ClosedSocket));
        }
        let text = serde_json::to_string(msg).map_err(|e| {
            tracerr::new!(TransportError::SerializeClientMessage(
                e.to_string()
            ))
        })?;
        lock(&self.socket)
            .outgoing
            .unbounded_send(Message::Text(text))
            .map_err(|e| {
                tracerr::new!(TransportError::SendMessage(e.to_string()))
            })
    }

    fn on_state_change(&self) -> BoxStream<'static, TransportState> {
        self.socket_state.subscribe()
    }

    fn close(&self) {
        if self.socket_state.with(TransportState::can_send) {
            self.socket_state.set(TransportState::Closing);
            let _ = lock(&self.socket)
                .outgoing
                .unbounded_send(Message::Close(None));
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`RpcTransportFactory`] establishing [`WebSocketTransport`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransportFactory;

#[async_trait]
impl RpcTransportFactory for WebSocketTransportFactory {
    async fn connect(
        &self,
        url: Url,
    ) -> Result<Arc<dyn RpcTransport>, Traced<TransportError>> {
        let transport = WebSocketTransport::connect(url)
            .await
            .map_err(tracerr::wrap!())?;
        Ok(Arc::new(transport))
    }
}

fn close_msg(frame: Option<CloseFrame<'_>>) -> CloseMsg {
    match frame {
        Some(frame) => {
            let code: u16 = frame.code.into();
            if code == 1000 {
                CloseMsg::Normal(code, frame.reason.into_owned())
            } else {
                CloseMsg::Abnormal(code)
            }
        }
        None => CloseMsg::Abnormal(ABNORMAL_CLOSE_CODE),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
