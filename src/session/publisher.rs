//! Publisher peer connection of a media session and its negotiations.

use std::sync::{Arc, Weak};

use futures::{
    channel::mpsc,
    future,
    stream::{BoxStream, StreamExt as _},
};
use tandem_sfu_proto::{PeerType, TrackType, VideoSender};
use tracerr::Traced;

use crate::{
    coordinator::OwnCapability,
    peer::{self, simulcast, PeerConnection, PeerEvent},
    platform::{MediaStreamTrack, RtcConfiguration, SessionDescription},
    utils::{Categorized as _, ErrorKind, TaskHandle},
};

use super::{link, lock, reconnect, Inner, SessionError};

/// Published [`TrackType`]s with the capabilities required to publish them.
pub(super) const PUBLISHABLE: [(TrackType, OwnCapability); 3] = [
    (TrackType::Audio, OwnCapability::SendAudio),
    (TrackType::Video, OwnCapability::SendVideo),
    (TrackType::ScreenShare, OwnCapability::Screenshare),
];

/// Publisher [`PeerConnection`] with its negotiation queue.
pub(super) struct Publisher {
    pub(super) peer: Arc<PeerConnection>,

    /// Requested negotiations, `true` for the ones restarting ICE.
    negotiations: mpsc::UnboundedSender<bool>,

    _tasks: Vec<TaskHandle>,
}

/// Returns the [`OwnCapability`] required to publish the provided
/// [`TrackType`].
pub(super) fn required_capability(
    track_type: TrackType,
) -> Option<OwnCapability> {
    PUBLISHABLE
        .iter()
        .find(|(tt, _)| *tt == track_type)
        .map(|(_, cap)| *cap)
}

/// Captures the microphone and camera tracks if the own capabilities allow
/// publishing them.
///
/// Capturing failures aren't fatal: the call proceeds without the track.
pub(super) async fn capture_allowed_tracks(inner: &Inner) {
    for (track_type, capability) in &PUBLISHABLE[..2] {
        if !inner.has_capability(*capability) {
            continue;
        }
        if let Err(e) = inner.media.get_or_create(*track_type).await {
            log::warn!("Failed to capture {} track: {}", track_type, e);
        }
    }
}

/// Publishes every captured local track the own capabilities allow.
pub(super) fn publish_allowed_tracks(
    inner: &Arc<Inner>,
) -> Result<(), Traced<SessionError>> {
    for (track_type, capability) in &PUBLISHABLE {
        if !inner.has_capability(*capability) {
            continue;
        }
        if let Some(track) = inner.media.track(*track_type) {
            publish(inner, *track_type, track)?;
        }
    }
    Ok(())
}

/// Publishes the provided track, creating the publisher if there is none.
///
/// Negotiation follows once the media engine asks for it.
pub(super) fn publish(
    inner: &Arc<Inner>,
    track_type: TrackType,
    track: Arc<dyn MediaStreamTrack>,
) -> Result<(), Traced<SessionError>> {
    let peer = ensure(inner)?;
    let init = peer::send_only_init(
        track_type,
        &inner.session_id(),
        inner.conf.media.simulcast,
    );
    drop(
        peer.add_transceiver(track_type, track, init)
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?,
    );
    Ok(())
}

/// Stops publishing the track of the provided [`TrackType`].
///
/// Returns `false` if it wasn't published.
pub(super) fn unpublish(inner: &Inner, track_type: TrackType) -> bool {
    inner
        .publisher()
        .and_then(|p| p.remove_track(track_type))
        .is_some()
}

/// Returns the publisher, creating it if there is none.
fn ensure(
    inner: &Arc<Inner>,
) -> Result<Arc<PeerConnection>, Traced<SessionError>> {
    let mut publisher = lock(&inner.publisher);
    if let Some(p) = publisher.as_ref() {
        return Ok(Arc::clone(&p.peer));
    }

    let config = RtcConfiguration {
        ice_servers: inner
            .credentials()
            .map(|c| c.ice_servers)
            .unwrap_or_default(),
    };
    let peer = Arc::new(
        PeerConnection::new(
            PeerType::Publisher,
            inner.ctx.peer_factory.as_ref(),
            &config,
        )
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?,
    );
    let (negotiations, negotiations_rx) = mpsc::unbounded();

    let (events_task, events_abort) = future::abortable(handle_events(
        Arc::downgrade(inner),
        Arc::downgrade(&peer),
        peer.subscribe(),
        negotiations.clone(),
    ));
    drop(tokio::spawn(events_task));
    let (negotiator, negotiator_abort) = future::abortable(run_negotiations(
        Arc::downgrade(inner),
        Arc::downgrade(&peer),
        negotiations_rx,
    ));
    drop(tokio::spawn(negotiator));

    *publisher = Some(Publisher {
        peer: Arc::clone(&peer),
        negotiations,
        _tasks: vec![events_abort.into(), negotiator_abort.into()],
    });
    Ok(peer)
}

/// Requests a publisher negotiation, optionally restarting ICE.
///
/// No-op if there is no publisher.
pub(super) fn renegotiate(inner: &Inner, ice_restart: bool) {
    if let Some(publisher) = lock(&inner.publisher).as_ref() {
        if ice_restart {
            publisher.peer.restart_ice();
        }
        if publisher.negotiations.unbounded_send(ice_restart).is_err() {
            log::debug!("Publisher negotiation dropped: publisher is closed");
        }
    }
}

async fn handle_events(
    inner: Weak<Inner>,
    peer: Weak<PeerConnection>,
    mut events: BoxStream<'static, PeerEvent>,
    negotiations: mpsc::UnboundedSender<bool>,
) {
    while let Some(event) = events.next().await {
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        match event {
            PeerEvent::IceCandidateDiscovered { candidate, .. } => {
                if let Some(link) = inner.current_link() {
                    link::send_local_candidate(
                        &inner,
                        &link,
                        PeerType::Publisher,
                        &candidate,
                    );
                }
            }
            PeerEvent::NegotiationNeeded { .. } => {
                if negotiations.unbounded_send(false).is_err() {
                    log::debug!("Negotiation dropped: publisher is closed");
                }
            }
            PeerEvent::ConnectionStateChanged { state, .. } => {
                reconnect::on_peer_state(&inner, peer.clone(), state);
            }
            PeerEvent::StreamAdded { .. } | PeerEvent::StreamRemoved { .. } => {
            }
        }
    }
}

/// Runs the requested negotiations one by one, coalescing the ones requested
/// while another is in progress.
async fn run_negotiations(
    inner: Weak<Inner>,
    peer: Weak<PeerConnection>,
    mut requests: mpsc::UnboundedReceiver<bool>,
) {
    while let Some(mut ice_restart) = requests.next().await {
        while let Ok(more) = requests.try_recv() {
            ice_restart |= more;
        }
        let (inner, peer) = match (inner.upgrade(), peer.upgrade()) {
            (Some(inner), Some(peer)) => (inner, peer),
            _ => break,
        };
        if let Err(e) = negotiate(&inner, &peer, ice_restart).await {
            match e.kind() {
                ErrorKind::Unrecoverable => inner.fail(e),
                _ => log::warn!("Publisher negotiation failed: {}", e),
            }
        }
    }
}

/// Offers the current publisher state to the SFU of the current link and
/// applies its answer.
///
/// An answer arriving after the link has been replaced is discarded: it
/// describes a session on the SFU the call isn't connected to anymore.
async fn negotiate(
    inner: &Inner,
    peer: &PeerConnection,
    ice_restart: bool,
) -> Result<(), Traced<SessionError>> {
    let _negotiation = peer.negotiation_lock().await;
    let link = inner
        .current_link()
        .ok_or_else(|| tracerr::new!(SessionError::NotConnected))?;
    let munging = inner.munging();

    let offer = peer
        .create_offer(ice_restart)
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    let sdp = munging.apply(&offer.sdp);
    peer.set_local_description(SessionDescription::offer(sdp.clone()))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;

    let tracks = peer.track_infos(munging);
    let answer = link
        .signal
        .set_publisher(sdp, tracks, || inner.is_current(&link))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
    if !inner.is_current(&link) {
        log::info!(
            "Discarding publisher answer of superseded SFU {}",
            link.signal.edge_name(),
        );
        return Ok(());
    }

    peer.set_remote_description(SessionDescription::answer(answer.sdp))
        .await
        .map_err(tracerr::map_from_and_wrap!(=> SessionError))
}

/// Applies the publish quality requested by the SFU to the published video.
pub(super) fn change_publish_quality(inner: &Inner, senders: &[VideoSender]) {
    let transceiver = match inner
        .publisher()
        .and_then(|p| p.transceiver(TrackType::Video))
    {
        Some(t) => t,
        None => return,
    };
    for sender in senders.iter().filter(|s| s.track_type == TrackType::Video) {
        let encodings = match simulcast::apply_publish_quality(
            &transceiver.encodings(),
            &sender.layers,
        ) {
            Some(encodings) => encodings,
            None => continue,
        };
        if let Err(e) = transceiver.set_encodings(encodings) {
            log::warn!("Failed to change publish quality: {}", e);
        }
    }
}

/// Stops publishing the tracks the own capabilities don't allow anymore.
pub(super) fn unpublish_revoked(inner: &Inner) {
    let state = inner.call_state();
    for (track_type, capability) in &PUBLISHABLE {
        if state.has_capability(*capability) || !unpublish(inner, *track_type)
        {
            continue;
        }
        log::info!("Unpublished {} track: permission revoked", track_type);
        if *track_type == TrackType::ScreenShare {
            inner.media.release(*track_type);
        }
    }
}
