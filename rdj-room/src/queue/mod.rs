//! Request queue management
//!
//! Ordered insertion and removal of queue entries for one room, with
//! per-submitter quota enforcement and a configurable ordering strategy.

pub mod ordering;
pub mod quota;

pub use ordering::{strategy_for, Append, Placement, PositionStrategy, RoundRobin};

use crate::auth::{Authorizer, Capability};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::store::{with_retry, RetryPolicy, StateStore};
use chrono::{DateTime, Utc};
use rdj_common::events::RemovalReason;
use rdj_common::{EntryId, QueueEntry, RoomId, SubmitterQuota, Track};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Queue manager for a single room
pub struct QueueManager {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
    strategy: Box<dyn PositionStrategy>,
    cap: usize,
    retry: RetryPolicy,
    /// Serializes quota check + placement + insert
    enqueue_lock: Mutex<()>,
}

impl QueueManager {
    pub fn new(
        room_id: impl Into<RoomId>,
        store: Arc<dyn StateStore>,
        authorizer: Arc<dyn Authorizer>,
        config: &QueueConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            authorizer,
            strategy: strategy_for(config.ordering),
            cap: config.per_submitter_cap,
            retry,
            enqueue_lock: Mutex::new(()),
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Current queue, head first
    pub async fn list(&self) -> Result<Vec<QueueEntry>> {
        with_retry(&self.retry, "list queue", || self.store.list_queue(&self.room_id)).await
    }

    /// Lowest-position entry without removing it
    pub async fn head(&self) -> Result<Option<QueueEntry>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Store `track` and queue it for `submitter_id`
    ///
    /// Rejected with `SuspendedSubmitter` or `QuotaExceeded` before anything
    /// is written.
    pub async fn enqueue(&self, track: &Track, submitter_id: &str) -> Result<QueueEntry> {
        let _guard = self.enqueue_lock.lock().await;
        let now = Utc::now();

        let queue = self.list().await?;
        let quota = self.quota_with(&queue, submitter_id).await?;
        quota::check_admission(&quota, self.cap, now)?;

        with_retry(&self.retry, "insert track", || self.store.insert_track(track)).await?;

        let placement = self.strategy.place(&queue, submitter_id);
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            track_id: track.id,
            position: placement.position,
            submitter_id: submitter_id.to_string(),
            added_at: now,
        };
        self.store
            .insert_queue_entry(&entry, placement.shift_from)
            .await?;

        debug!(
            "Queued {} for {} in {} at position {} ({})",
            track.id,
            submitter_id,
            self.room_id,
            entry.position,
            self.strategy.name()
        );
        Ok(entry)
    }

    /// Remove and return the head entry
    ///
    /// An entry removed concurrently by someone else is skipped and the next
    /// head is tried. The removal is standalone: the scheduler does not call
    /// this, it claims the head with `StateStore::promote`, which removes the
    /// entry and writes the playback state in one step.
    pub async fn dequeue_head(&self) -> Result<Option<QueueEntry>> {
        loop {
            let Some(head) = self.head().await? else {
                return Ok(None);
            };
            if let Some(removed) = self
                .store
                .delete_queue_entry(&self.room_id, head.id, RemovalReason::Promoted)
                .await?
            {
                return Ok(Some(removed));
            }
        }
    }

    /// Remove an entry on behalf of its owner or a moderator
    pub async fn remove(&self, entry_id: EntryId, requester_id: &str) -> Result<QueueEntry> {
        let entry = self
            .list()
            .await?
            .into_iter()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| Error::NotFound(format!("queue entry {}", entry_id)))?;

        let reason = if entry.submitter_id == requester_id {
            RemovalReason::Withdrawn
        } else {
            self.authorizer
                .require(&self.room_id, requester_id, Capability::Moderator)
                .await?;
            RemovalReason::Moderated
        };

        let removed = self
            .store
            .delete_queue_entry(&self.room_id, entry_id, reason)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queue entry {}", entry_id)))?;
        info!("Removed {} from {} ({}) by {}", entry_id, self.room_id, reason, requester_id);
        Ok(removed)
    }

    /// 1-indexed rank of the submitter's earliest queued entry
    pub async fn position_of(&self, submitter_id: &str) -> Result<Option<usize>> {
        Ok(self
            .list()
            .await?
            .iter()
            .position(|e| e.submitter_id == submitter_id)
            .map(|index| index + 1))
    }

    pub async fn quota(&self, submitter_id: &str) -> Result<SubmitterQuota> {
        let queue = self.list().await?;
        self.quota_with(&queue, submitter_id).await
    }

    async fn quota_with(&self, queue: &[QueueEntry], submitter_id: &str) -> Result<SubmitterQuota> {
        let total_played = with_retry(&self.retry, "played count", || {
            self.store.played_count(&self.room_id, submitter_id)
        })
        .await?;
        let suspended_until = with_retry(&self.retry, "suspension lookup", || {
            self.store.get_suspension(&self.room_id, submitter_id)
        })
        .await?;
        Ok(SubmitterQuota {
            submitter_id: submitter_id.to_string(),
            current_queue_count: quota::queued_by(queue, submitter_id),
            total_played,
            suspended_until,
        })
    }

    /// Suspend a submitter's intake privilege until `until`
    pub async fn suspend(&self, moderator_id: &str, submitter_id: &str, until: DateTime<Utc>) -> Result<()> {
        self.authorizer
            .require(&self.room_id, moderator_id, Capability::Moderator)
            .await?;
        if until <= Utc::now() {
            return Err(Error::Validation("suspension must end in the future".to_string()));
        }
        self.store
            .set_suspension(&self.room_id, submitter_id, Some(until))
            .await?;
        info!("{} suspended {} in {} until {}", moderator_id, submitter_id, self.room_id, until);
        Ok(())
    }

    pub async fn lift_suspension(&self, moderator_id: &str, submitter_id: &str) -> Result<()> {
        self.authorizer
            .require(&self.room_id, moderator_id, Capability::Moderator)
            .await?;
        self.store.set_suspension(&self.room_id, submitter_id, None).await?;
        info!("{} lifted suspension of {} in {}", moderator_id, submitter_id, self.room_id);
        Ok(())
    }
}
