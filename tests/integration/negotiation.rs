//! Offer/answer exchange with the SFU.

use std::{sync::atomic::Ordering, time::Duration};

use tandem_sfu_proto::{IceTrickle, PeerType, SfuEvent, TrackType};

use crate::fakes::{wait_until, Harness};

fn trickle(candidate: &str) -> SfuEvent {
    SfuEvent::IceTrickle(IceTrickle {
        peer_type: PeerType::Subscriber,
        ice_candidate: format!(
            r#"{{"candidate":"{}","sdpMid":"0","sdpMLineIndex":0}}"#,
            candidate,
        ),
        session_id: "local".into(),
    })
}

#[tokio::test]
async fn buffers_candidates_until_subscriber_offer() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "trickle");
    call.join(true).await.unwrap();
    let subscriber = h.peers.open_since(0).pop().unwrap();

    sfu.emit(trickle("c1"));
    sfu.emit(trickle("c2"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(subscriber.candidates().is_empty());

    sfu.emit(SfuEvent::SubscriberOffer {
        sdp: "subscriber-offer".into(),
        ice_restart: false,
    });
    wait_until("buffered candidates are flushed", || {
        subscriber.candidates().len() == 2
    })
    .await;
    assert_eq!(subscriber.remote_sdps(), vec!["subscriber-offer"]);

    sfu.emit(trickle("c3"));
    wait_until("late candidate is added", || {
        subscriber.candidates().len() == 3
    })
    .await;

    assert_eq!(
        subscriber.candidates(),
        vec![
            ("c1".to_owned(), true),
            ("c2".to_owned(), true),
            ("c3".to_owned(), true),
        ],
    );
}

#[tokio::test]
async fn drops_malformed_candidates() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "malformed-trickle");
    call.join(true).await.unwrap();
    let subscriber = h.peers.open_since(0).pop().unwrap();

    sfu.emit(SfuEvent::IceTrickle(IceTrickle {
        peer_type: PeerType::Subscriber,
        ice_candidate: "not a candidate".into(),
        session_id: "local".into(),
    }));
    sfu.emit(SfuEvent::SubscriberOffer {
        sdp: "subscriber-offer".into(),
        ice_restart: false,
    });
    sfu.emit(trickle("c1"));

    wait_until("valid candidate is added", || {
        subscriber.candidates().len() == 1
    })
    .await;
    assert_eq!(subscriber.candidates(), vec![("c1".to_owned(), true)]);
}

#[tokio::test]
async fn stopping_unshared_screen_only_reports_mute() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "unshared-screen");
    call.join(true).await.unwrap();

    call.stop_screenshare();

    wait_until("screen mute state is sent", || {
        sfu.signal.mute_states.lock().unwrap().iter().any(|req| {
            req.mute_states
                .iter()
                .any(|s| s.track_type == TrackType::ScreenShare && s.muted)
        })
    })
    .await;
    assert!(sfu.signal.publisher_offers.lock().unwrap().is_empty());
    assert_eq!(h.media.screens.load(Ordering::SeqCst), 0);
}
