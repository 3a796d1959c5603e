//! Request intake
//!
//! Validates a raw request, resolves it into a track, queues it and, when
//! the room is idle, asks the scheduler to advance immediately so the first
//! request of a quiet room starts without waiting for the next poll.

pub mod metadata;
pub mod reference;

pub use metadata::{MetadataError, MetadataResolver, NullResolver, OEmbedResolver, TrackMetadata};
pub use reference::{parse_reference, MediaReference};

use crate::config::IntakeConfig;
use crate::error::{Error, Result};
use crate::queue::QueueManager;
use crate::scheduler::{AdvanceOutcome, AutoDj, SchedulerHandle};
use crate::store::{with_retry, RetryPolicy, StateStore};
use chrono::Utc;
use rdj_common::{QueueEntry, RoomId, Track};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A request as submitted by a user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequest {
    /// Link to the media
    pub reference: String,
    /// Title override; resolved metadata is used when absent
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub dedication: Option<String>,
    /// Duration, when the submitting client knows it
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Accepted request
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub track: Track,
    pub entry: QueueEntry,
    /// The request started playing straight away
    pub promoted: bool,
}

/// Intake for one room
pub struct RequestIntake {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    queue: Arc<QueueManager>,
    dj: Arc<AutoDj>,
    scheduler: SchedulerHandle,
    resolver: Arc<dyn MetadataResolver>,
    config: IntakeConfig,
    retry: RetryPolicy,
}

impl RequestIntake {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        room_id: impl Into<RoomId>,
        store: Arc<dyn StateStore>,
        queue: Arc<QueueManager>,
        dj: Arc<AutoDj>,
        scheduler: SchedulerHandle,
        resolver: Arc<dyn MetadataResolver>,
        config: IntakeConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            queue,
            dj,
            scheduler,
            resolver,
            config,
            retry,
        }
    }

    /// Accept or reject one request
    pub async fn submit(&self, raw: RawRequest, submitter_id: &str) -> Result<Submission> {
        if submitter_id.trim().is_empty() {
            return Err(Error::Validation("submitter id is required".to_string()));
        }
        let title_override = self.clean_field("title", raw.title, self.config.max_title_len)?;
        let dedication = self.clean_field("dedication", raw.dedication, self.config.max_dedication_len)?;

        let reference = parse_reference(&raw.reference)?;
        let metadata = self.lookup(&reference).await;

        let title = title_override
            .or(metadata.title)
            .unwrap_or_else(|| reference.fallback_title.clone());
        let track = Track {
            id: Uuid::new_v4(),
            title: truncate_chars(&title, self.config.max_title_len),
            source_type: reference.source_type,
            media_ref: reference.media_ref,
            thumbnail: metadata.thumbnail,
            duration_ms: raw.duration_ms.or(metadata.duration_ms),
            submitter_id: Some(submitter_id.to_string()),
            dedication,
            created_at: Utc::now(),
        };

        let entry = self.queue.enqueue(&track, submitter_id).await?;
        info!(
            "{} requested '{}' ({}) in {}",
            submitter_id, track.title, track.source_type, self.room_id
        );

        let promoted = match self.advance_if_idle().await {
            Ok(Some(AdvanceOutcome::Promoted { track_id, .. })) => track_id == track.id,
            // The scheduler may have promoted it from the queue notification first
            Ok(_) => self.is_now_playing(&track).await,
            Err(e) => {
                // The request is queued; the next poll will promote it
                warn!("Inline advance in {} failed: {}", self.room_id, e);
                false
            }
        };

        Ok(Submission {
            track,
            entry,
            promoted,
        })
    }

    async fn advance_if_idle(&self) -> Result<Option<AdvanceOutcome>> {
        let state = with_retry(&self.retry, "load playback state", || {
            self.store.load_state(&self.room_id)
        })
        .await?;
        if !self.dj.is_idle(&state.record).await? {
            return Ok(None);
        }
        let outcome = self.scheduler.kick().await?;
        debug!("Inline advance in {}: {:?}", self.room_id, outcome);
        Ok(Some(outcome))
    }

    async fn is_now_playing(&self, track: &Track) -> bool {
        match self.store.load_state(&self.room_id).await {
            Ok(state) => state.record.track_id == Some(track.id),
            Err(e) => {
                debug!("Could not confirm playback of {} in {}: {}", track.id, self.room_id, e);
                false
            }
        }
    }

    async fn lookup(&self, reference: &MediaReference) -> TrackMetadata {
        match tokio::time::timeout(self.config.metadata_timeout(), self.resolver.resolve(reference)).await {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                warn!("Metadata lookup for {} failed: {}", reference.media_ref, e);
                TrackMetadata::default()
            }
            Err(_) => {
                warn!("Metadata lookup for {} timed out", reference.media_ref);
                TrackMetadata::default()
            }
        }
    }

    fn clean_field(&self, name: &str, value: Option<String>, max_len: usize) -> Result<Option<String>> {
        let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        if value.chars().count() > max_len {
            return Err(Error::Validation(format!(
                "{} is longer than {} characters",
                name, max_len
            )));
        }
        Ok(Some(value))
    }
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}
