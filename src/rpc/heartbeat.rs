//! Connection loss detection via health checks.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures::{
    channel::mpsc,
    future,
    stream::{BoxStream, StreamExt as _},
};
use tandem_sfu_proto::SfuRequest;

use crate::{platform::RpcTransport, utils::TaskHandle};

/// Idle timeout of an [`SfuChannel`].
///
/// [`SfuChannel`]: super::SfuChannel
#[derive(Clone, Copy, Debug)]
pub struct IdleTimeout(pub Duration);

/// Interval between health check pings of an [`SfuChannel`].
///
/// [`SfuChannel`]: super::SfuChannel
#[derive(Clone, Copy, Debug)]
pub struct PingInterval(pub Duration);

struct Inner {
    /// [`RpcTransport`] which heartbeats.
    transport: Option<Arc<dyn RpcTransport>>,

    /// Handle of the task sending [`SfuRequest::HealthCheck`]s.
    ping_task: Option<TaskHandle>,

    /// Handle of the task listening to the incoming messages.
    listen_task: Option<TaskHandle>,

    /// Handle of the task resolving the idle state.
    idle_resolver: Option<TaskHandle>,

    /// Subscribers of [`Heartbeat::on_idle`].
    on_idle_subs: Vec<mpsc::UnboundedSender<()>>,

    idle_timeout: IdleTimeout,

    ping_interval: PingInterval,
}

/// Detector of a silently lost SFU socket.
///
/// Sends [`SfuRequest::HealthCheck`]s every [`PingInterval`] and considers
/// the socket idle if nothing is received during [`IdleTimeout`].
pub struct Heartbeat(Arc<Mutex<Inner>>);

impl Heartbeat {
    /// Creates a new stopped [`Heartbeat`].
    #[must_use]
    pub fn new(idle_timeout: IdleTimeout, ping_interval: PingInterval) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            transport: None,
            ping_task: None,
            listen_task: None,
            idle_resolver: None,
            on_idle_subs: Vec::new(),
            idle_timeout,
            ping_interval,
        })))
    }

    /// Starts heartbeating of the provided [`RpcTransport`].
    pub fn start(&self, transport: Arc<dyn RpcTransport>) {
        let mut on_message = transport.on_message();
        lock(&self.0).transport = Some(Arc::clone(&transport));
        Self::update_idle_resolver(&self.0);

        let weak = Arc::downgrade(&self.0);
        let (listen, listen_abort) = future::abortable(async move {
            while on_message.next().await.is_some() {
                match weak.upgrade() {
                    Some(this) => Self::update_idle_resolver(&this),
                    None => break,
                }
            }
        });
        drop(tokio::spawn(listen));

        let interval = lock(&self.0).ping_interval.0;
        let (ping, ping_abort) = future::abortable(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = transport.send(&SfuRequest::HealthCheck) {
                    log::error!("Failed to send health check: {}", e);
                }
            }
        });
        drop(tokio::spawn(ping));

        let mut inner = lock(&self.0);
        inner.listen_task = Some(listen_abort.into());
        inner.ping_task = Some(ping_abort.into());
    }

    /// Stops this [`Heartbeat`].
    pub fn stop(&self) {
        let mut inner = lock(&self.0);
        inner.transport.take();
        inner.ping_task.take();
        inner.listen_task.take();
        inner.idle_resolver.take();
    }

    /// Returns a [`BoxStream`] emitting once the socket is considered idle.
    pub fn on_idle(&self) -> BoxStream<'static, ()> {
        let (tx, rx) = mpsc::unbounded();
        lock(&self.0).on_idle_subs.push(tx);
        Box::pin(rx)
    }

    /// Aborts the current idle resolver and spawns a new one.
    fn update_idle_resolver(this: &Arc<Mutex<Inner>>) {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(this);
        let idle_timeout = lock(this).idle_timeout.0;
        let (resolver, abort) = future::abortable(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(this) = weak.upgrade() {
                lock(&this)
                    .on_idle_subs
                    .retain(|sub| sub.unbounded_send(()).is_ok());
            }
        });
        drop(tokio::spawn(resolver));
        lock(this).idle_resolver = Some(abort.into());
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
