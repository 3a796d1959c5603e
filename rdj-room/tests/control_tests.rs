//! Privileged control surface tests

mod helpers;

use chrono::Utc;
use helpers::*;
use rdj_common::{position_ms, PlaySource};
use rdj_room::scheduler::AdvanceOutcome;
use rdj_room::store::{MemoryStore, StateStore};
use rdj_room::Error;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_pause_then_play_keeps_position() {
    let (registry, room, _store) = open_room().await;
    let a = track("a", Some(600_000));
    room.control.set_track(CONTROLLER, a.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let paused = room.control.pause(CONTROLLER).await.unwrap();
    assert!(paused.record.paused);
    assert!(paused.record.started_at.is_none());
    let frozen = paused.record.seek_base_ms;
    assert!(frozen >= 50, "frozen at {}", frozen);

    // Position does not move while paused
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(position_ms(&room.state().await.unwrap().record, Utc::now()), frozen);

    let resumed = room.control.play(CONTROLLER).await.unwrap();
    assert!(!resumed.record.paused);
    assert_eq!(resumed.record.seek_base_ms, frozen);
    assert!(resumed.record.started_at.is_some());
    assert!(position_ms(&resumed.record, Utc::now()) >= frozen);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_repeated_pause_is_a_no_op() {
    let (registry, room, _store) = open_room().await;
    room.control
        .set_track(CONTROLLER, track("a", Some(600_000)))
        .await
        .unwrap();

    let first = room.control.pause(CONTROLLER).await.unwrap();
    let second = room.control.pause(CONTROLLER).await.unwrap();
    assert_eq!(first.version, second.version);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_seek_is_clamped_to_duration() {
    let (registry, room, _store) = open_room().await;
    room.control
        .set_track(CONTROLLER, track("a", Some(120_000)))
        .await
        .unwrap();

    let stored = room.control.seek(CONTROLLER, 90_000).await.unwrap();
    assert_eq!(stored.record.seek_base_ms, 90_000);
    assert!(!stored.record.paused);

    room.control.pause(CONTROLLER).await.unwrap();
    let clamped = room.control.seek(CONTROLLER, 10_000_000).await.unwrap();
    assert_eq!(clamped.record.seek_base_ms, 120_000);
    assert!(clamped.record.paused);
    assert!(clamped.record.started_at.is_none());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_non_controller_is_rejected() {
    let (registry, room, _store) = open_room().await;
    room.control
        .set_track(CONTROLLER, track("a", Some(600_000)))
        .await
        .unwrap();
    let before = room.state().await.unwrap();

    assert!(matches!(room.control.pause("alice").await, Err(Error::Unauthorized(_))));
    assert!(matches!(room.control.seek("alice", 5).await, Err(Error::Unauthorized(_))));
    assert!(matches!(room.control.stop("alice").await, Err(Error::Unauthorized(_))));
    assert!(matches!(room.control.skip("alice").await, Err(Error::Unauthorized(_))));
    assert!(matches!(
        room.control.set_track("alice", track("b", None)).await,
        Err(Error::Unauthorized(_))
    ));

    assert_eq!(room.state().await.unwrap(), before);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_play_without_track_is_invalid() {
    let (registry, room, _store) = open_room().await;
    assert!(matches!(room.control.play(CONTROLLER).await, Err(Error::InvalidState(_))));
    assert!(matches!(room.control.skip(CONTROLLER).await, Err(Error::InvalidState(_))));
    registry.shutdown().await;
}

#[tokio::test]
async fn test_set_track_records_history_and_bypasses_queue() {
    let (registry, room, store) = open_room().await;
    let queued = track("queued", None);
    let playing = track("playing", Some(600_000));
    seed_playing(store.as_ref(), &playing, Utc::now()).await;
    seed_queued(store.as_ref(), &queued, "alice", 1).await;

    let direct = track("direct", Some(300_000));
    let stored = room.control.set_track(CONTROLLER, direct.clone()).await.unwrap();
    assert_eq!(stored.record.track_id, Some(direct.id));
    assert_eq!(stored.record.seek_base_ms, 0);
    assert_eq!(stored.record.updated_by.as_deref(), Some(CONTROLLER));

    let history = room.history(5).await.unwrap();
    assert_eq!(history[0].track_id, direct.id);
    assert_eq!(history[0].source, PlaySource::Controller);
    assert_eq!(room.queue.list().await.unwrap().len(), 1);

    // Replaying a stored track from history
    let replayed = room.control.replay(CONTROLLER, playing.id).await.unwrap();
    assert_eq!(replayed.record.track_id, Some(playing.id));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_replay_does_not_credit_original_submitter() {
    let (registry, room, store) = open_room().await;
    let mut requested = track("requested", Some(600_000));
    requested.submitter_id = Some("alice".to_string());

    room.control.set_track(CONTROLLER, requested.clone()).await.unwrap();
    assert_eq!(store.played_count(ROOM, "alice").await.unwrap(), 1);

    room.control.replay(CONTROLLER, requested.id).await.unwrap();
    assert_eq!(store.played_count(ROOM, "alice").await.unwrap(), 1);
    let history = room.history(5).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|h| h.submitter_id.is_none()).count(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_set_track_survives_history_failure() {
    let store = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new()), 0));
    let registry = registry_with(store.clone(), test_config());
    let room = registry.room(ROOM).await.unwrap();
    store.fail_history();

    let a = track("a", Some(600_000));
    let stored = room.control.set_track(CONTROLLER, a.clone()).await.unwrap();
    assert_eq!(stored.record.track_id, Some(a.id));
    assert_eq!(room.state().await.unwrap().record.track_id, Some(a.id));
    assert!(room.history(5).await.unwrap().is_empty());

    registry.shutdown().await;
}

#[tokio::test]
async fn test_set_track_from_link() {
    let (registry, room, _store) = open_room().await;
    let stored = room
        .control
        .set_track_from_link(CONTROLLER, &audio_link("live-set"), None, Some(90_000))
        .await
        .unwrap();

    let track_id = stored.record.track_id.unwrap();
    let track = registry.store().get_track(track_id).await.unwrap().unwrap();
    assert_eq!(track.title, "live-set.mp3");
    assert_eq!(track.duration_ms, Some(90_000));

    let err = room
        .control
        .set_track_from_link(CONTROLLER, "not a link", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReference(_)));

    registry.shutdown().await;
}

#[tokio::test]
async fn test_stop_clears_playback() {
    let (registry, room, _store) = open_room().await;
    room.control
        .set_track(CONTROLLER, track("a", Some(600_000)))
        .await
        .unwrap();

    let stopped = room.control.stop(CONTROLLER).await.unwrap();
    assert_eq!(stopped.record.track_id, None);
    assert!(stopped.record.paused);
    assert_eq!(stopped.record.seek_base_ms, 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_skip_advances_to_queue_head() {
    let (registry, room, store) = open_room().await;
    let a = track("a", Some(600_000));
    let b = track("b", Some(600_000));
    seed_playing(store.as_ref(), &a, Utc::now()).await;
    seed_queued(store.as_ref(), &b, "alice", 1).await;

    let outcome = room.control.skip(CONTROLLER).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Promoted { track_id, .. } if track_id == b.id));
    assert!(room.queue.list().await.unwrap().is_empty());

    // Skipping the last track empties the room
    assert_eq!(room.control.skip(CONTROLLER).await.unwrap(), AdvanceOutcome::Cleared);

    registry.shutdown().await;
}
