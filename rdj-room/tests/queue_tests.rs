//! Queue manager tests: ordering strategies, removal rights, ranks

mod helpers;

use helpers::*;
use rdj_common::events::{ChangeEvent, RemovalReason};
use rdj_room::auth::StaticAuthorizer;
use rdj_room::config::{OrderingPolicy, QueueConfig};
use rdj_room::queue::QueueManager;
use rdj_room::store::{MemoryStore, RetryPolicy, StateStore};
use rdj_room::Error;
use std::sync::Arc;

fn manager(store: Arc<dyn StateStore>, ordering: OrderingPolicy, cap: usize) -> QueueManager {
    let config = test_config();
    let queue_config = QueueConfig {
        per_submitter_cap: cap,
        ordering,
    };
    QueueManager::new(
        ROOM,
        store,
        Arc::new(StaticAuthorizer::from_config(&config.auth)),
        &queue_config,
        RetryPolicy::none(),
    )
}

async fn submitters_in_order(queue: &QueueManager) -> Vec<String> {
    queue
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.submitter_id)
        .collect()
}

#[tokio::test]
async fn test_append_keeps_arrival_order() {
    let queue = manager(Arc::new(MemoryStore::new()), OrderingPolicy::Append, 3);
    for submitter in ["a", "a", "b", "c", "a"] {
        queue.enqueue(&track("t", None), submitter).await.unwrap();
    }
    assert_eq!(submitters_in_order(&queue).await, vec!["a", "a", "b", "c", "a"]);
}

#[tokio::test]
async fn test_round_robin_interleaves_submitters() {
    let queue = manager(Arc::new(MemoryStore::new()), OrderingPolicy::RoundRobin, 3);
    for submitter in ["a", "a", "a", "b", "b", "c"] {
        queue.enqueue(&track("t", None), submitter).await.unwrap();
    }
    assert_eq!(
        submitters_in_order(&queue).await,
        vec!["a", "b", "c", "a", "b", "a"]
    );

    // Positions stay unique after mid-queue inserts
    let entries = queue.list().await.unwrap();
    let mut positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
    positions.dedup();
    assert_eq!(positions.len(), entries.len());
}

#[tokio::test]
async fn test_cap_applies_per_submitter() {
    let queue = manager(Arc::new(MemoryStore::new()), OrderingPolicy::Append, 2);
    queue.enqueue(&track("1", None), "a").await.unwrap();
    queue.enqueue(&track("2", None), "a").await.unwrap();
    let err = queue.enqueue(&track("3", None), "a").await.unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { cap: 2, .. }));
    assert_eq!(queue.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_owner_withdraws_and_moderator_removes() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let queue = manager(Arc::clone(&store), OrderingPolicy::Append, 3);
    let mine = queue.enqueue(&track("mine", None), "alice").await.unwrap();
    let theirs = queue.enqueue(&track("theirs", None), "bob").await.unwrap();
    let mut events = store.subscribe();

    // Someone else's entry needs the moderator capability
    let err = queue.remove(theirs.id, "alice").await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    queue.remove(mine.id, "alice").await.unwrap();
    queue.remove(theirs.id, MODERATOR).await.unwrap();
    assert!(queue.list().await.unwrap().is_empty());

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChangeEvent::QueueEntryRemoved { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, vec![RemovalReason::Withdrawn, RemovalReason::Moderated]);

    // Already gone
    let err = queue.remove(mine.id, "alice").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_position_of_reports_earliest_rank() {
    let queue = manager(Arc::new(MemoryStore::new()), OrderingPolicy::Append, 3);
    queue.enqueue(&track("1", None), "a").await.unwrap();
    queue.enqueue(&track("2", None), "b").await.unwrap();
    queue.enqueue(&track("3", None), "b").await.unwrap();

    assert_eq!(queue.position_of("a").await.unwrap(), Some(1));
    assert_eq!(queue.position_of("b").await.unwrap(), Some(2));
    assert_eq!(queue.position_of("nobody").await.unwrap(), None);
}

#[tokio::test]
async fn test_dequeue_head_takes_lowest_position() {
    let queue = manager(Arc::new(MemoryStore::new()), OrderingPolicy::Append, 3);
    let first = queue.enqueue(&track("1", None), "a").await.unwrap();
    let second = queue.enqueue(&track("2", None), "b").await.unwrap();

    assert_eq!(queue.head().await.unwrap().map(|e| e.id), Some(first.id));
    assert_eq!(queue.dequeue_head().await.unwrap().map(|e| e.id), Some(first.id));
    assert_eq!(queue.dequeue_head().await.unwrap().map(|e| e.id), Some(second.id));
    assert_eq!(queue.dequeue_head().await.unwrap(), None);
}

#[tokio::test]
async fn test_quota_counts_plays_and_suspension() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let queue = manager(Arc::clone(&store), OrderingPolicy::Append, 3);
    queue.enqueue(&track("1", None), "a").await.unwrap();
    queue.dequeue_head().await.unwrap();
    queue.enqueue(&track("2", None), "a").await.unwrap();

    let quota = queue.quota("a").await.unwrap();
    assert_eq!(quota.current_queue_count, 1);
    assert_eq!(quota.total_played, 0);
    assert_eq!(quota.suspended_until, None);

    let past = chrono::Utc::now() - chrono::Duration::minutes(1);
    let err = queue.suspend(MODERATOR, "a", past).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
