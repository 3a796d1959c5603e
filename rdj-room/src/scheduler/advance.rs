//! Idempotent claim-and-promote
//!
//! `advance()` may be called any number of times, concurrently, from any
//! trigger. It promotes the queue head only when the room is idle, and only
//! one caller at a time gets past the guard. Every decision is made on a
//! fresh read of the store.

use super::guard::AdvanceGuard;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::store::{with_retry, Promotion, RetryPolicy, StateStore};
use chrono::Utc;
use rdj_common::events::RemovalReason;
use rdj_common::position::is_exhausted;
use rdj_common::{HistoryEntry, PlaySource, PlaybackState, RoomId, TrackId, Versioned};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one `advance()` or `end_track()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// Queue head is now playing
    Promoted { track_id: TrackId, version: u64 },
    /// Queue was empty; playback state cleared
    Cleared,
    /// Queue empty and playback state already clear; nothing written
    AlreadyIdle,
    /// Something is playing (or paused mid-track)
    NotIdle,
    /// Another advance holds the guard
    Busy,
    /// The queue entry was consumed elsewhere twice in a row
    LostRace,
    /// Track-ended report for a track that is no longer current
    Stale,
    /// Inline advance did not finish in time; the next trigger will retry
    Deferred,
}

/// The per-room autonomous scheduler's advancement logic
pub struct AutoDj {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    guard: Arc<AdvanceGuard>,
    config: SchedulerConfig,
    retry: RetryPolicy,
}

impl AutoDj {
    pub fn new(
        room_id: impl Into<RoomId>,
        store: Arc<dyn StateStore>,
        guard: Arc<AdvanceGuard>,
        config: SchedulerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            guard,
            config,
            retry,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    async fn fresh_state(&self) -> Result<Versioned<PlaybackState>> {
        with_retry(&self.retry, "load playback state", || {
            self.store.load_state(&self.room_id)
        })
        .await
    }

    /// Nothing is audibly playing: no track, paused at or past the end, or
    /// playing well past the known duration
    pub async fn is_idle(&self, state: &PlaybackState) -> Result<bool> {
        let Some(track_id) = state.track_id else {
            return Ok(true);
        };
        let duration = self
            .store
            .get_track(track_id)
            .await?
            .and_then(|t| t.duration_ms);
        Ok(is_exhausted(state, duration, Utc::now(), self.config.overrun_grace_ms))
    }

    /// Promote the queue head if the room is idle
    pub async fn advance(&self) -> Result<AdvanceOutcome> {
        let state = self.fresh_state().await?;
        if !self.is_idle(&state.record).await? {
            return Ok(AdvanceOutcome::NotIdle);
        }

        let Some(_permit) = self.guard.try_acquire("advance") else {
            debug!("advance in {} skipped: guard held", self.room_id);
            return Ok(AdvanceOutcome::Busy);
        };
        self.promote_head(None).await
    }

    /// Treat `track_id` as finished and move on
    ///
    /// Ignored unless `track_id` is still the current track. Waits for the
    /// guard rather than skipping, so an end-of-track report is never lost
    /// to a concurrent no-op advance.
    pub async fn end_track(&self, track_id: TrackId) -> Result<AdvanceOutcome> {
        let _permit = self
            .guard
            .acquire_timeout("track_ended", self.config.guard_timeout())
            .await?;
        self.promote_head(Some(track_id)).await
    }

    /// Steps after the guard is held: re-check idle, read the queue, then
    /// clear or promote
    async fn promote_head(&self, ended: Option<TrackId>) -> Result<AdvanceOutcome> {
        let mut race_retried = false;
        let mut conflicts = 0u32;

        loop {
            let state = self.fresh_state().await?;
            match ended {
                Some(track_id) if state.record.track_id != Some(track_id) => {
                    debug!("Ignoring stale track-ended for {} in {}", track_id, self.room_id);
                    return Ok(AdvanceOutcome::Stale);
                }
                Some(_) => {}
                None => {
                    if !self.is_idle(&state.record).await? {
                        return Ok(AdvanceOutcome::NotIdle);
                    }
                }
            }

            let queue = with_retry(&self.retry, "list queue", || {
                self.store.list_queue(&self.room_id)
            })
            .await?;

            let result = match queue.first() {
                None => self.clear(&state).await,
                Some(head) => {
                    let Some(track) = self.store.get_track(head.track_id).await? else {
                        warn!(
                            "Dropping queue entry {} in {}: track {} missing",
                            head.id, self.room_id, head.track_id
                        );
                        self.store
                            .delete_queue_entry(&self.room_id, head.id, RemovalReason::Withdrawn)
                            .await?;
                        continue;
                    };

                    let now = Utc::now();
                    let promotion = Promotion {
                        entry_id: head.id,
                        expected_version: state.version,
                        state: PlaybackState::started(self.room_id.clone(), track.id, now, None),
                        history: HistoryEntry {
                            id: Uuid::new_v4(),
                            room_id: self.room_id.clone(),
                            track_id: track.id,
                            submitter_id: Some(head.submitter_id.clone()),
                            started_at: now,
                            source: PlaySource::Queue,
                        },
                    };
                    self.store.promote(promotion).await.map(|stored| {
                        info!(
                            "Now playing '{}' ({}) in {}, requested by {}",
                            track.title, track.id, self.room_id, head.submitter_id
                        );
                        AdvanceOutcome::Promoted {
                            track_id: track.id,
                            version: stored.version,
                        }
                    })
                }
            };

            match result {
                Err(Error::RaceLost(msg)) if !race_retried => {
                    debug!("advance in {} lost a race ({}); retrying once", self.room_id, msg);
                    race_retried = true;
                }
                Err(Error::RaceLost(msg)) => {
                    debug!("advance in {} lost a race again ({}); giving up", self.room_id, msg);
                    return Ok(AdvanceOutcome::LostRace);
                }
                Err(Error::Conflict(msg)) if conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                    debug!(
                        "advance in {} hit a write conflict ({}); retry {}/{}",
                        self.room_id, msg, conflicts, self.config.max_conflict_retries
                    );
                }
                other => return other,
            }
        }
    }

    async fn clear(&self, state: &Versioned<PlaybackState>) -> Result<AdvanceOutcome> {
        if state.record.is_cleared() && state.record.paused {
            return Ok(AdvanceOutcome::AlreadyIdle);
        }
        self.store
            .compare_and_set_state(state.version, PlaybackState::idle(self.room_id.clone(), Utc::now()))
            .await?;
        info!("Queue empty in {}; playback cleared", self.room_id);
        Ok(AdvanceOutcome::Cleared)
    }
}
