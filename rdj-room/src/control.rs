//! Privileged control surface
//!
//! Direct overwrites of a room's playback state by a user holding the
//! room-controller capability. Every write is an optimistic update on a
//! fresh read, retried on conflict. `set_track` and `stop` also take the
//! advance guard so they cannot interleave with a scheduler promotion.

use crate::auth::{Authorizer, Capability};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::intake::parse_reference;
use crate::scheduler::{AdvanceGuard, AdvanceOutcome, SchedulerHandle};
use crate::store::{with_retry, RetryPolicy, StateStore};
use chrono::{DateTime, Utc};
use rdj_common::{position_ms, HistoryEntry, PlaySource, PlaybackState, RoomId, Track, TrackId, Versioned};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Controller operations for one room
pub struct ControlSurface {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
    guard: Arc<AdvanceGuard>,
    scheduler: SchedulerHandle,
    config: SchedulerConfig,
    retry: RetryPolicy,
}

impl ControlSurface {
    pub fn new(
        room_id: impl Into<RoomId>,
        store: Arc<dyn StateStore>,
        authorizer: Arc<dyn Authorizer>,
        guard: Arc<AdvanceGuard>,
        scheduler: SchedulerHandle,
        config: SchedulerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            authorizer,
            guard,
            scheduler,
            config,
            retry,
        }
    }

    async fn authorize(&self, user_id: &str) -> Result<()> {
        self.authorizer
            .require(&self.room_id, user_id, Capability::RoomController)
            .await
    }

    /// Read-modify-write with conflict retries
    ///
    /// `change` returns `None` when the state already matches the request.
    async fn update<F>(&self, user_id: &str, mut change: F) -> Result<Versioned<PlaybackState>>
    where
        F: FnMut(&PlaybackState, DateTime<Utc>) -> Result<Option<PlaybackState>>,
    {
        let mut conflicts = 0;
        loop {
            let current = with_retry(&self.retry, "load playback state", || {
                self.store.load_state(&self.room_id)
            })
            .await?;
            let now = Utc::now();
            let Some(mut next) = change(&current.record, now)? else {
                return Ok(current);
            };
            next.updated_by = Some(user_id.to_string());
            next.updated_at = now;

            match self.store.compare_and_set_state(current.version, next).await {
                Err(Error::Conflict(_)) if conflicts < self.config.max_conflict_retries => {
                    conflicts += 1;
                }
                other => return other,
            }
        }
    }

    /// Resume from the frozen position
    pub async fn play(&self, user_id: &str) -> Result<Versioned<PlaybackState>> {
        self.authorize(user_id).await?;
        let stored = self
            .update(user_id, |state, now| {
                require_track(state)?;
                if !state.paused {
                    return Ok(None);
                }
                let mut next = state.clone();
                next.paused = false;
                next.started_at = Some(now);
                Ok(Some(next))
            })
            .await?;
        info!("{} resumed {} at {}ms", user_id, self.room_id, stored.record.seek_base_ms);
        Ok(stored)
    }

    /// Freeze the timeline at the current computed position
    pub async fn pause(&self, user_id: &str) -> Result<Versioned<PlaybackState>> {
        self.authorize(user_id).await?;
        let stored = self
            .update(user_id, |state, now| {
                require_track(state)?;
                if state.paused {
                    return Ok(None);
                }
                let mut next = state.clone();
                next.seek_base_ms = position_ms(state, now);
                next.paused = true;
                next.started_at = None;
                Ok(Some(next))
            })
            .await?;
        info!("{} paused {} at {}ms", user_id, self.room_id, stored.record.seek_base_ms);
        Ok(stored)
    }

    /// Jump to `position_ms`, clamped to the track's known duration
    pub async fn seek(&self, user_id: &str, position_ms: u64) -> Result<Versioned<PlaybackState>> {
        self.authorize(user_id).await?;
        let current = self.store.load_state(&self.room_id).await?;
        let track_id = require_track(&current.record)?;
        let duration = self.store.get_track(track_id).await?.and_then(|t| t.duration_ms);
        let target = duration.map(|d| position_ms.min(d)).unwrap_or(position_ms);

        let stored = self
            .update(user_id, |state, now| {
                if state.track_id != Some(track_id) {
                    return Err(Error::Conflict("track changed while seeking".to_string()));
                }
                let mut next = state.clone();
                next.seek_base_ms = target;
                next.started_at = if state.paused { None } else { Some(now) };
                Ok(Some(next))
            })
            .await?;
        info!("{} seeked {} to {}ms", user_id, self.room_id, target);
        Ok(stored)
    }

    /// Start `track` from zero, bypassing the queue
    ///
    /// A track not yet in the store is created first and credited to its
    /// submitter in the play history. Replays of stored tracks credit nobody.
    /// The history entry is written after the state; a failed append is
    /// logged and does not undo the playback.
    pub async fn set_track(&self, user_id: &str, track: Track) -> Result<Versioned<PlaybackState>> {
        self.authorize(user_id).await?;
        let credit = if self.store.get_track(track.id).await?.is_none() {
            self.store.insert_track(&track).await?;
            track.submitter_id.clone()
        } else {
            None
        };

        let _permit = self
            .guard
            .acquire_timeout("set_track", self.config.guard_timeout())
            .await?;
        let stored = self
            .update(user_id, |_, now| {
                Ok(Some(PlaybackState::started(self.room_id.clone(), track.id, now, None)))
            })
            .await?;

        let history = HistoryEntry {
            id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            track_id: track.id,
            submitter_id: credit,
            started_at: stored.record.updated_at,
            source: PlaySource::Controller,
        };
        if let Err(e) = self.store.append_history(&history).await {
            warn!("History not recorded for {} in {}: {}", track.id, self.room_id, e);
        }
        info!("{} set '{}' ({}) in {}", user_id, track.title, track.id, self.room_id);
        Ok(stored)
    }

    /// Replay a stored track (e.g. one picked from history)
    pub async fn replay(&self, user_id: &str, track_id: TrackId) -> Result<Versioned<PlaybackState>> {
        let track = self
            .store
            .get_track(track_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("track {}", track_id)))?;
        self.set_track(user_id, track).await
    }

    /// Start a new track from a link
    pub async fn set_track_from_link(
        &self,
        user_id: &str,
        link: &str,
        title: Option<String>,
        duration_ms: Option<u64>,
    ) -> Result<Versioned<PlaybackState>> {
        let reference = parse_reference(link)?;
        let track = Track {
            id: Uuid::new_v4(),
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(reference.fallback_title),
            source_type: reference.source_type,
            media_ref: reference.media_ref,
            thumbnail: None,
            duration_ms,
            submitter_id: Some(user_id.to_string()),
            dedication: None,
            created_at: Utc::now(),
        };
        self.set_track(user_id, track).await
    }

    /// Clear the playback state
    ///
    /// A non-empty queue is picked up again by the scheduler.
    pub async fn stop(&self, user_id: &str) -> Result<Versioned<PlaybackState>> {
        self.authorize(user_id).await?;
        let _permit = self
            .guard
            .acquire_timeout("stop", self.config.guard_timeout())
            .await?;
        let stored = self
            .update(user_id, |state, now| {
                if state.is_cleared() && state.paused {
                    return Ok(None);
                }
                Ok(Some(PlaybackState::idle(self.room_id.clone(), now)))
            })
            .await?;
        info!("{} stopped playback in {}", user_id, self.room_id);
        Ok(stored)
    }

    /// End the current track now and let the scheduler move on
    pub async fn skip(&self, user_id: &str) -> Result<AdvanceOutcome> {
        self.authorize(user_id).await?;
        let current = self.store.load_state(&self.room_id).await?;
        let track_id = require_track(&current.record)?;
        info!("{} skipped {} in {}", user_id, track_id, self.room_id);
        self.scheduler.track_ended(track_id).await
    }
}

fn require_track(state: &PlaybackState) -> Result<TrackId> {
    state
        .track_id
        .ok_or_else(|| Error::InvalidState("nothing is loaded".to_string()))
}
