//! Recovery of a media session from connectivity losses.
//!
//! A short network outage is recovered with a fast reconnect, which rejoins
//! the same SFU with the same session and restarts ICE, keeping the
//! publisher. Anything else, or a failed fast reconnect, leads to a full
//! reconnect: the transport is torn down and the session joins from scratch.

use std::sync::{Arc, Weak};

use futures::{
    future::{self, BoxFuture, FutureExt as _},
    stream::{BoxStream, StreamExt as _},
};
use tandem_sfu_proto::{ReconnectDetails, ReconnectStrategy};
use tokio::time::Instant;
use tracerr::Traced;

use crate::{
    peer::PeerConnection,
    platform::{NetworkStatus, PeerConnectionState},
    utils::{retry, Retryable as _},
};

use super::{
    link::Link, lock, publisher, subscriptions, Inner, SessionError,
    SessionState,
};

/// Starts watching the network reachability, unless it's watched already.
pub(super) fn watch_network(inner: &Arc<Inner>) {
    let mut watcher = lock(&inner.network_watcher);
    if watcher.is_some() {
        return;
    }
    let (fut, abort) = future::abortable(watch(
        Arc::downgrade(inner),
        inner.ctx.network.subscribe(),
    ));
    drop(tokio::spawn(fut));
    *watcher = Some(abort.into());
}

async fn watch(
    inner: Weak<Inner>,
    mut statuses: BoxStream<'static, NetworkStatus>,
) {
    while let Some(status) = statuses.next().await {
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        match status {
            NetworkStatus::Unavailable => {
                let mut disconnected_at = lock(&inner.disconnected_at);
                if disconnected_at.is_none() {
                    log::warn!("Network is unavailable");
                    *disconnected_at = Some(Instant::now());
                }
            }
            NetworkStatus::Available => {
                let since = match lock(&inner.disconnected_at).take() {
                    Some(at) => at,
                    None => continue,
                };
                if !inner.is_active() {
                    continue;
                }
                let offline = since.elapsed();
                let inner = Arc::clone(&inner);
                if offline <= inner.conf.reconnect.fast_reconnect_window {
                    log::info!("Network restored after {:?}", offline);
                    inner.scope.clone().spawn(fast(inner));
                } else {
                    log::info!(
                        "Network restored after {:?}, rejoining",
                        offline,
                    );
                    inner.scope.clone().spawn(full(inner));
                }
            }
        }
    }
}

/// Reacts on a connection state change of a peer of the current link.
///
/// A failed peer leads to a full reconnect right away, a disconnected one
/// only if it doesn't recover within the settle delay. Nothing is done
/// while the network is unavailable: its restoration decides.
pub(super) fn on_peer_state(
    inner: &Arc<Inner>,
    peer: Weak<PeerConnection>,
    state: PeerConnectionState,
) {
    if !state.is_lost() || inner.state.get() != SessionState::Connected {
        return;
    }
    if lock(&inner.disconnected_at).is_some() {
        log::debug!("Peer is {} while network is unavailable", state);
        return;
    }

    let inner = Arc::clone(inner);
    if state == PeerConnectionState::Failed {
        log::warn!("Peer connection failed, reconnecting");
        inner.scope.clone().spawn(full(inner));
        return;
    }
    inner.scope.clone().spawn(async move {
        tokio::time::sleep(inner.conf.reconnect.settle_delay).await;
        let still_lost = peer.upgrade().map_or(false, |p| p.state().is_lost());
        if still_lost
            && inner.state.get() == SessionState::Connected
            && lock(&inner.disconnected_at).is_none()
        {
            log::warn!("Peer connection didn't recover, reconnecting");
            full(inner).await;
        }
    });
}

/// Fast reconnect: rejoins the SFU of the current credentials with the same
/// session, restarting ICE of the publisher.
///
/// Falls back to a full reconnect if the peers don't connect within the
/// settle delay (extended once while they're still connecting).
pub(super) fn fast(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    reconnect_fast(inner).boxed()
}

async fn reconnect_fast(inner: Arc<Inner>) {
    let _recovery = match inner.recovery.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            log::debug!("Fast reconnect skipped: recovery in progress");
            return;
        }
    };
    if !inner.is_active() {
        return;
    }
    log::info!("Reconnecting fast");
    inner.set_state(SessionState::Reconnecting).await;

    match rejoin_fast(&inner).await {
        Ok(true) => {
            log::info!("Fast reconnect succeeded");
            inner.set_state(SessionState::Connected).await;
        }
        Ok(false) => {
            log::warn!("Peers didn't recover after fast reconnect");
            full_locked(&inner).await;
        }
        Err(e) => {
            if inner.scope.is_cancelled() {
                return;
            }
            log::warn!("Fast reconnect failed: {}", e);
            full_locked(&inner).await;
        }
    }
}

async fn rejoin_fast(inner: &Arc<Inner>) -> Result<bool, Traced<SessionError>> {
    let credentials = inner
        .credentials()
        .ok_or_else(|| tracerr::new!(SessionError::NotConnected))?;
    let details = inner.reconnect_details(ReconnectStrategy::Fast, 0);

    let link =
        Link::join(inner, &credentials, inner.session_id(), true, Some(details))
            .await?;
    if inner.scope.is_cancelled() {
        drop(link.close(false));
        return Err(tracerr::new!(SessionError::Closed));
    }
    drop(inner.commit_link(link, false));

    if has_published_tracks(inner) {
        publisher::renegotiate(inner, true);
    }
    subscriptions::refresh(inner);

    Ok(settle(inner).await)
}

/// Waits for the peers to connect, returning `false` if any of them is lost.
async fn settle(inner: &Inner) -> bool {
    let delay = inner.conf.reconnect.settle_delay;
    tokio::time::sleep(delay).await;
    let states = peer_states(inner);
    if states.iter().any(|s| s.is_lost()) {
        return false;
    }
    if states.iter().any(|s| *s != PeerConnectionState::Connected) {
        log::debug!("Peers are still connecting: {:?}", states);
        tokio::time::sleep(delay).await;
    }
    !peer_states(inner).iter().any(|s| s.is_lost())
}

/// States of the subscriber and of the publisher, if the latter publishes
/// anything.
fn peer_states(inner: &Inner) -> Vec<PeerConnectionState> {
    let subscriber = inner.current_link().and_then(|l| l.subscriber());
    let publisher = inner
        .publisher()
        .filter(|p| !p.published_tracks().is_empty());
    subscriber
        .into_iter()
        .chain(publisher)
        .map(|p| p.state())
        .collect()
}

fn has_published_tracks(inner: &Inner) -> bool {
    inner
        .publisher()
        .map_or(false, |p| !p.published_tracks().is_empty())
}

/// Full reconnect, unless another recovery is in progress.
pub(super) fn full(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    reconnect_full(inner).boxed()
}

async fn reconnect_full(inner: Arc<Inner>) {
    let _recovery = match inner.recovery.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            log::debug!("Full reconnect skipped: recovery in progress");
            return;
        }
    };
    if !inner.is_active() {
        return;
    }
    full_locked(&inner).await;
}

/// Tears the transport down and joins from scratch with a new session,
/// retrying up to the configured number of attempts.
///
/// Must be called with the recovery lock held.
pub(super) async fn full_locked(inner: &Arc<Inner>) {
    log::info!("Reconnecting");
    inner.set_state(SessionState::Reconnecting).await;
    let details = inner.reconnect_details(ReconnectStrategy::Rejoin, 0);

    let max_attempts = inner.conf.reconnect.max_full_reconnect_attempts;
    for attempt in 1..=max_attempts {
        if inner.scope.is_cancelled() {
            return;
        }
        inner.teardown_transport();

        let details = ReconnectDetails {
            reconnect_attempt: attempt,
            ..details.clone()
        };
        let err = match super::join(inner, false, Some(details)).await {
            Ok(()) => {
                log::info!("Reconnected on attempt {}", attempt);
                return;
            }
            Err(e) => e,
        };
        if !err.is_retryable() {
            inner.teardown_transport();
            inner.fail(err);
            return;
        }
        log::warn!("Reconnect attempt {} failed: {}", attempt, err);
        let delay = retry::nominal_delay(&inner.conf.retry.fast, attempt);
        tokio::time::sleep(delay).await;
    }

    inner.teardown_transport();
    inner.fail(tracerr::new!(SessionError::ReconnectFailed(max_attempts)));
}
