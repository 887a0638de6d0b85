//! Remote track subscriptions of a media session.

use std::sync::{atomic::Ordering, Arc};

use tandem_sfu_proto::{TrackSubscriptionDetails, TrackType, VideoDimension};

use crate::{
    call::state::{CallState, IncomingVideoPolicy},
    peer::simulcast::DEFAULT_VIDEO_DIMENSION,
};

use super::Inner;

/// Computes the desired subscriptions to the tracks of the remote
/// participants, ordered by their session IDs.
///
/// Audio is subscribed whenever it's published. Video is subscribed only for
/// the participants whose track is shown, at their rendered size (or the
/// size forced by the [`IncomingVideoPolicy`]). Screen share is always
/// subscribed at the default size.
#[must_use]
pub fn compute(state: &CallState) -> Vec<TrackSubscriptionDetails> {
    let mut subscriptions = Vec::new();
    for p in state.remote_participants() {
        let mut subscribe = |track_type, dimension| {
            subscriptions.push(TrackSubscriptionDetails {
                user_id: p.user_id.clone(),
                session_id: p.session_id.clone(),
                track_type,
                dimension,
            });
        };

        if p.has_audio {
            subscribe(TrackType::Audio, None);
        }
        if p.has_video && p.show_track {
            if let Some(dimension) =
                video_dimension(state.incoming_video_policy, p.track_size)
            {
                subscribe(TrackType::Video, Some(dimension));
            }
        }
        if p.is_screensharing {
            subscribe(TrackType::ScreenShare, Some(DEFAULT_VIDEO_DIMENSION));
        }
    }
    subscriptions
}

fn video_dimension(
    policy: IncomingVideoPolicy,
    rendered: VideoDimension,
) -> Option<VideoDimension> {
    match policy {
        IncomingVideoPolicy::Disabled => None,
        IncomingVideoPolicy::Manual { target } => Some(target),
        IncomingVideoPolicy::Auto if rendered.is_empty() => {
            Some(DEFAULT_VIDEO_DIMENSION)
        }
        IncomingVideoPolicy::Auto => Some(rendered),
    }
}

/// Recomputes the subscriptions and sends them to the SFU of the current
/// link.
///
/// Retries stop once a newer computation supersedes this one.
pub(super) fn refresh(inner: &Arc<Inner>) {
    let marker = inner.subscriptions_marker.fetch_add(1, Ordering::SeqCst) + 1;
    let link = match inner.current_link() {
        Some(link) => link,
        None => return,
    };
    let subscriptions = compute(&inner.call_state());

    let inner = Arc::clone(inner);
    inner.scope.clone().spawn(async move {
        let res = link
            .signal
            .update_subscriptions(subscriptions, || {
                inner.subscriptions_marker.load(Ordering::SeqCst) == marker
                    && !link.is_closed()
            })
            .await;
        if let Err(e) = res {
            if inner.subscriptions_marker.load(Ordering::SeqCst) == marker {
                log::error!("Failed to update subscriptions: {}", e);
            } else {
                log::debug!("Superseded subscriptions update dropped: {}", e);
            }
        }
    });
}
