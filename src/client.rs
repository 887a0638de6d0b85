//! Entry point of the orchestrator: collaborators and the calls cache.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    call::{Call, Registry},
    conf::Conf,
    coordinator::CoordinatorApi,
    platform::{
        MediaSource, NetworkMonitor, PeerConnectionFactory,
        RpcTransportFactory,
    },
    rpc::SignalServiceFactory,
};

/// Collaborators the orchestrator is built on, provided by the host.
#[derive(Clone)]
pub struct Context {
    /// Coordinator API issuing SFU credentials.
    pub coordinator: Arc<dyn CoordinatorApi>,

    pub peer_factory: Arc<dyn PeerConnectionFactory>,

    /// Producer of the local tracks.
    pub media_source: Arc<dyn MediaSource>,

    /// Factory of the SFU sockets.
    pub transport_factory: Arc<dyn RpcTransportFactory>,

    /// Factory of the SFU signal services.
    pub signal_factory: Arc<dyn SignalServiceFactory>,

    pub network: Arc<dyn NetworkMonitor>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish()
    }
}

/// Client owning the calls of a single user.
#[derive(Debug)]
pub struct Client {
    ctx: Context,
    conf: Conf,

    /// Calls by their CIDs (`{type}:{id}`).
    calls: Arc<Registry>,
}

impl Client {
    /// Creates a new [`Client`] without any calls.
    #[must_use]
    pub fn new(ctx: Context, conf: Conf) -> Self {
        Self {
            ctx,
            conf,
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// [`Conf`] of this [`Client`].
    #[inline]
    #[must_use]
    pub fn conf(&self) -> &Conf {
        &self.conf
    }

    /// Returns the [`Call`] of the provided type and ID, creating a new idle
    /// one if there is none.
    ///
    /// A left [`Call`] is evicted, so a new one is returned afterwards.
    pub fn call(&self, call_type: &str, call_id: &str) -> Call {
        let cid = format!("{}:{}", call_type, call_id);
        lock(&self.calls)
            .entry(cid)
            .or_insert_with(|| {
                Call::new(
                    self.ctx.clone(),
                    self.conf.clone(),
                    call_type,
                    call_id,
                    Arc::downgrade(&self.calls),
                )
            })
            .clone()
    }

    /// Returns the [`Call`] of the provided CID, if it's cached.
    #[must_use]
    pub fn get(&self, cid: &str) -> Option<Call> {
        lock(&self.calls).get(cid).cloned()
    }

    /// Returns all the cached [`Call`]s.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).values().cloned().collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
