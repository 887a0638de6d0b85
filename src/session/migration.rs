//! Handoff of a media session to another SFU.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt as _};
use tandem_sfu_proto::ReconnectStrategy;
use tracerr::Traced;

use super::{
    link::Link, lock, publisher, reconnect, subscriptions, Inner,
    SessionError, SessionState,
};

/// Migrates the session to the SFU assigned by the coordinator.
///
/// The subscriber of the SFU being left keeps receiving media (paused, so it
/// doesn't trickle ICE anymore) until the new subscriber connects. Falls
/// back to a full reconnect on failure.
pub(super) fn migrate(inner: Arc<Inner>) -> BoxFuture<'static, ()> {
    run(inner).boxed()
}

async fn run(inner: Arc<Inner>) {
    let _recovery = match inner.recovery.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            log::debug!("Migration skipped: recovery in progress");
            return;
        }
    };
    if !inner.is_active() {
        return;
    }
    let from = match inner.current_link() {
        Some(link) => link.signal.edge_name().to_owned(),
        None => return,
    };
    log::info!("Migrating from SFU {}", from);
    inner.set_state(SessionState::Migrating).await;

    match handoff(&inner, from).await {
        Ok(()) => {
            log::info!("Migration completed");
            inner.set_state(SessionState::Connected).await;
        }
        Err(e) => {
            if let Some(old) = lock(&inner.temporary_subscriber).take() {
                old.close();
            }
            if inner.scope.is_cancelled() {
                return;
            }
            log::warn!("Migration failed, rejoining: {}", e);
            reconnect::full_locked(&inner).await;
        }
    }
}

async fn handoff(
    inner: &Arc<Inner>,
    from: String,
) -> Result<(), Traced<SessionError>> {
    let details = inner.reconnect_details(ReconnectStrategy::Migrate, 0);
    let credentials = inner.fetch_credentials(false, Some(from)).await?;

    if let Some(old) = inner.current_link().and_then(|l| l.subscriber()) {
        old.pause();
    }
    let session_id = inner.session_id();
    let link =
        Link::join(inner, &credentials, session_id, false, Some(details))
            .await?;
    if inner.scope.is_cancelled() {
        drop(link.close(false));
        return Err(tracerr::new!(SessionError::Closed));
    }
    let subscriber = link
        .subscriber()
        .ok_or_else(|| tracerr::new!(SessionError::NotConnected))?;

    if let Some(old) = inner.commit_link(link, true) {
        if let Some(stale) = lock(&inner.temporary_subscriber).replace(old) {
            stale.close();
        }
    }
    if inner
        .publisher()
        .map_or(false, |p| !p.published_tracks().is_empty())
    {
        publisher::renegotiate(inner, true);
    }
    subscriptions::refresh(inner);

    let connected = tokio::time::timeout(
        inner.conf.call.join_timeout,
        subscriber.when_connected(),
    )
    .await;
    if let Some(old) = lock(&inner.temporary_subscriber).take() {
        old.close();
    }
    connected.map_err(|_| tracerr::new!(SessionError::JoinTimeout))
}
