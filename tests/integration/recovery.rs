//! Recovery of the media session: reconnects, migrations and the races
//! they bring.

use std::{sync::atomic::Ordering, time::Duration};

use tandem::{
    coordinator::OwnCapability,
    platform::{NetworkStatus, PeerConnectionState},
    session::SessionState,
};
use tandem_sfu_proto::{
    GoAwayReason, PeerType, ReconnectStrategy, SfuEvent, TrackType,
};

use crate::fakes::{participant, wait_until, Harness};

#[tokio::test]
async fn fast_reconnect_keeps_published_tracks() {
    let h = Harness::new();
    h.coordinator.grant(vec![OwnCapability::SendAudio]);
    let call = h.client.call("default", "fast-reconnect");
    call.join(true).await.unwrap();
    let sfu = h.sfu("sfu-1");
    wait_until("audio is negotiated", || {
        sfu.signal.publisher_offers.lock().unwrap().len() == 1
    })
    .await;
    let publisher = h.peers.publishers().pop().unwrap();
    let session_id = sfu.last_join().unwrap().session_id;

    h.network.set(NetworkStatus::Unavailable);
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.network.set(NetworkStatus::Available);

    wait_until("SFU is rejoined", || sfu.joins.lock().unwrap().len() == 2)
        .await;
    let rejoin = sfu.last_join().unwrap();
    assert!(rejoin.fast_reconnect);
    assert_eq!(rejoin.session_id, session_id);
    assert_eq!(
        rejoin.reconnect_details.map(|d| d.strategy),
        Some(ReconnectStrategy::Fast),
    );

    wait_until("session is connected", || {
        call.session_state() == SessionState::Connected
    })
    .await;
    wait_until("publisher restarts ICE", || {
        sfu.signal.publisher_offers.lock().unwrap().len() == 2
    })
    .await;

    assert_eq!(publisher.ice_restarts.load(Ordering::SeqCst), 1);
    assert!(!publisher.is_closed());
    assert_eq!(h.peers.publishers().len(), 1);
    assert_eq!(h.media.audio.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.join_count(), 1);
    assert_eq!(call.session_state(), SessionState::Connected);
}

#[tokio::test]
async fn long_outage_leads_to_full_reconnect() {
    let h = Harness::new();
    let call = h.client.call("default", "full-reconnect");
    call.join(true).await.unwrap();
    let sfu = h.sfu("sfu-1");
    let session_id = sfu.last_join().unwrap().session_id;

    h.network.set(NetworkStatus::Unavailable);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    h.network.set(NetworkStatus::Available);

    wait_until("SFU is rejoined", || sfu.joins.lock().unwrap().len() == 2)
        .await;
    let rejoin = sfu.last_join().unwrap();
    assert!(!rejoin.fast_reconnect);
    assert_ne!(rejoin.session_id, session_id);
    let details = rejoin.reconnect_details.unwrap();
    assert_eq!(details.strategy, ReconnectStrategy::Rejoin);
    assert_eq!(details.previous_session_id, session_id);
    assert_eq!(details.reconnect_attempt, 1);
    wait_until("session is connected", || {
        call.session_state() == SessionState::Connected
    })
    .await;
    assert_eq!(h.coordinator.join_count(), 2);
}

#[tokio::test]
async fn failed_peer_leads_to_full_reconnect() {
    let h = Harness::new();
    let call = h.client.call("default", "failed-peer");
    call.join(true).await.unwrap();
    let sfu = h.sfu("sfu-1");
    let subscriber = h.peers.open_since(0).pop().unwrap();

    subscriber.set_state(PeerConnectionState::Failed);

    wait_until("SFU is rejoined", || sfu.joins.lock().unwrap().len() == 2)
        .await;
    wait_until("failed subscriber is closed", || subscriber.is_closed())
        .await;
}

#[tokio::test]
async fn migration_keeps_old_subscriber_until_new_one_connects() {
    let h = Harness::new();
    let old_sfu = h.sfu("sfu-1");
    old_sfu.set_participants(vec![participant("s1")]);
    let call = h.client.call("default", "migration");
    call.join(true).await.unwrap();
    let session_id = old_sfu.last_join().unwrap().session_id;
    let old_subscriber = h.peers.open_since(0).pop().unwrap();

    let new_sfu = h.sfu("sfu-2");
    new_sfu.set_participants(vec![participant("s1")]);
    h.coordinator.assign_edge("sfu-2");
    h.peers.set_initial_state(PeerConnectionState::Connecting);
    let created = h.peers.count();
    old_sfu.emit(SfuEvent::GoAway {
        reason: GoAwayReason::Rebalance,
    });

    wait_until("new SFU is joined", || new_sfu.last_join().is_some()).await;
    let join = new_sfu.last_join().unwrap();
    assert_eq!(join.session_id, session_id);
    let details = join.reconnect_details.unwrap();
    assert_eq!(details.strategy, ReconnectStrategy::Migrate);
    assert_eq!(details.from_sfu_id, "sfu-1");
    let migrating_from = h.coordinator.joins.lock().unwrap()[1]
        .migrating_from
        .clone();
    assert_eq!(migrating_from.as_deref(), Some("sfu-1"));

    wait_until("new subscriber is created", || {
        !h.peers.open_since(created).is_empty()
    })
    .await;
    let new_subscriber = h.peers.open_since(created).pop().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!old_subscriber.is_closed());
    assert_eq!(call.session_state(), SessionState::Migrating);
    assert_eq!(call.edge_name().as_deref(), Some("sfu-2"));
    assert!(call.state().participants.contains_key("s1"));

    new_subscriber.set_state(PeerConnectionState::Connected);

    wait_until("old subscriber is closed", || old_subscriber.is_closed())
        .await;
    wait_until("migration completes", || {
        call.session_state() == SessionState::Connected
    })
    .await;
    assert!(!new_subscriber.is_closed());
    assert!(old_sfu.transports().iter().all(|t| t.is_closed()));
    assert!(call.state().participants.contains_key("s1"));
}

#[tokio::test]
async fn discards_publisher_answer_of_superseded_sfu() {
    let h = Harness::new();
    h.coordinator.grant(vec![OwnCapability::SendAudio]);
    let old_sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "stale-answer");
    call.join(true).await.unwrap();
    let publisher = h.peers.publishers().pop().unwrap();
    wait_until("audio is negotiated", || publisher.remote_sdps().len() == 1)
        .await;

    old_sfu
        .signal
        .delay_publisher_answers(Duration::from_millis(500));
    old_sfu.emit(SfuEvent::IceRestart {
        peer_type: PeerType::Publisher,
    });
    wait_until("offer reaches old SFU", || {
        old_sfu.signal.publisher_offers.lock().unwrap().len() == 2
    })
    .await;
    h.coordinator.assign_edge("sfu-2");
    old_sfu.emit(SfuEvent::GoAway {
        reason: GoAwayReason::ShuttingDown,
    });

    let new_sfu = h.sfu("sfu-2");
    wait_until("new SFU answers", || publisher.remote_sdps().len() == 2)
        .await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(publisher.remote_sdps(), vec!["answer-sfu-1", "answer-sfu-2"]);
    let offers = new_sfu.signal.publisher_offers.lock().unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].tracks[0].track_type, TrackType::Audio);
}

#[tokio::test]
async fn superseded_subscription_update_is_not_retried() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "supersession");
    call.join(true).await.unwrap();
    wait_until("initial subscriptions are sent", || {
        sfu.signal.last_subscriptions().is_some()
    })
    .await;

    sfu.signal.fail_subscriptions(true);
    let attempts = sfu.signal.subscription_attempts.load(Ordering::SeqCst);
    sfu.emit(SfuEvent::ParticipantJoined {
        call_cid: "default:supersession".into(),
        participant: participant("s1"),
    });
    wait_until("first update fails", || {
        sfu.signal.subscription_attempts.load(Ordering::SeqCst)
            == attempts + 1
    })
    .await;
    sfu.emit(SfuEvent::TrackPublished {
        user_id: "user-s1".into(),
        session_id: "s1".into(),
        track_type: TrackType::Audio,
        participant: None,
    });
    wait_until("second update fails", || {
        sfu.signal.subscription_attempts.load(Ordering::SeqCst)
            == attempts + 2
    })
    .await;
    sfu.signal.fail_subscriptions(false);

    wait_until("latest subscriptions are sent", || {
        sfu.signal
            .last_subscriptions()
            .map_or(false, |s| !s.is_empty())
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        sfu.signal.subscription_attempts.load(Ordering::SeqCst),
        attempts + 3,
    );
    let sent = sfu.signal.subscriptions.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].len(), 1);
    assert_eq!(sent[1][0].session_id, "s1");
    assert_eq!(sent[1][0].track_type, TrackType::Audio);
}
