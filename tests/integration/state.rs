//! Call state as seen by the application.

use std::{
    collections::HashMap, sync::atomic::Ordering, sync::Arc, time::Duration,
};

use futures::future;
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use tandem::call::{
    reducer,
    state::{CallParticipant, CallState},
    store::CallStore,
};
use tandem_sfu_proto::{SfuEvent, TrackType};

use crate::fakes::{participant, wait_until, Harness};

const CID: &str = "default:state";

fn joined(session_id: &str) -> SfuEvent {
    SfuEvent::ParticipantJoined {
        call_cid: CID.into(),
        participant: participant(session_id),
    }
}

fn audio_published(session_id: &str) -> SfuEvent {
    SfuEvent::TrackPublished {
        user_id: format!("user-{}", session_id),
        session_id: session_id.into(),
        track_type: TrackType::Audio,
        participant: None,
    }
}

#[tokio::test]
async fn empty_call_is_joined_without_publishing() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "state");

    call.join(true).await.unwrap();

    let state = call.state();
    assert!(state.is_initialized);
    assert!(state.participants.is_empty());
    assert!(sfu.signal.publisher_offers.lock().unwrap().is_empty());
    assert_eq!(h.media.audio.load(Ordering::SeqCst), 0);

    sfu.emit(joined("s1"));

    wait_until("participant joins", || {
        call.state().participants.contains_key("s1")
    })
    .await;
    let state = call.state();
    let remote: Vec<_> = state
        .remote_participants()
        .into_iter()
        .map(|p| p.session_id.clone())
        .collect();
    assert_eq!(remote, vec!["s1"]);
}

#[tokio::test]
async fn join_enumerates_present_participants() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    sfu.set_participants(vec![participant("s1"), participant("s2")]);
    let call = h.client.call("default", "state");

    tokio::time::timeout(Duration::from_secs(3), call.join(true))
        .await
        .unwrap()
        .unwrap();

    let state = call.state();
    assert!(state.is_initialized);
    assert_eq!(state.participant_count, 2);
    assert!(state.participants.contains_key("s1"));
    assert!(state.participants.contains_key("s2"));
}

#[tokio::test]
async fn ignores_tracks_of_unknown_sessions() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "state");
    call.join(true).await.unwrap();
    let version = call.snapshot().version;

    sfu.emit(audio_published("s9"));
    sfu.emit(joined("s1"));

    wait_until("participant joins", || {
        call.state().participants.contains_key("s1")
    })
    .await;
    assert!(!call.state().participants.contains_key("s9"));
    assert_eq!(call.snapshot().version, version + 1);
}

#[tokio::test]
async fn repeated_track_publication_is_idempotent() {
    let h = Harness::new();
    let sfu = h.sfu("sfu-1");
    let call = h.client.call("default", "state");
    call.join(true).await.unwrap();

    sfu.emit(joined("s1"));
    sfu.emit(audio_published("s1"));
    sfu.emit(audio_published("s1"));

    wait_until("audio is subscribed", || {
        sfu.signal.last_subscriptions().map_or(false, |subs| {
            subs.iter().any(|s| {
                s.session_id == "s1" && s.track_type == TrackType::Audio
            })
        })
    })
    .await;
    let state = call.state();
    assert_eq!(state.participants.len(), 1);
    assert!(state.participants["s1"].has_audio);
    assert!(!state.participants["s1"].has_video);
}

/// Random sequence of events about a single session.
fn random_events(rng: &mut StdRng, session_id: &str) -> Vec<SfuEvent> {
    let track_type = |rng: &mut StdRng| {
        if rng.gen_bool(0.5) {
            TrackType::Audio
        } else {
            TrackType::Video
        }
    };
    (0..rng.gen_range(5..30))
        .map(|n| match rng.gen_range(0..5) {
            0 => joined(session_id),
            1 => SfuEvent::ParticipantLeft {
                call_cid: CID.into(),
                participant: participant(session_id),
            },
            2 => SfuEvent::TrackPublished {
                user_id: format!("user-{}", session_id),
                session_id: session_id.into(),
                track_type: track_type(rng),
                participant: None,
            },
            3 => SfuEvent::TrackUnpublished {
                user_id: format!("user-{}", session_id),
                session_id: session_id.into(),
                track_type: track_type(rng),
                participant: None,
            },
            _ => {
                let mut p = participant(session_id);
                p.name = format!("{} #{}", session_id, n);
                SfuEvent::ParticipantUpdated {
                    call_cid: CID.into(),
                    participant: p,
                }
            }
        })
        .collect()
}

fn reduced(
    producers: &[Vec<SfuEvent>],
) -> HashMap<String, CallParticipant> {
    let mut state = CallState::new("default", "state");
    for event in producers.iter().flatten() {
        drop(reducer::reduce(&mut state, 100, event.clone()));
    }
    state.participants
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_producers_match_sequential_reduction() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let producers: Vec<_> = (0..5)
            .map(|n| random_events(&mut rng, &format!("s{}", n)))
            .collect();
        let store = Arc::new(CallStore::new(
            CallState::new("default", "state"),
            100,
        ));

        future::join_all(producers.iter().cloned().map(|events| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for event in events {
                    store.apply(event).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        }))
        .await
        .into_iter()
        .for_each(|res| res.unwrap());

        assert_eq!(
            store.state().participants,
            reduced(&producers),
            "seed {}",
            seed,
        );
    }
}
