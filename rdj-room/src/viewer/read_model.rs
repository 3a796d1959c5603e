//! Viewer-facing read model
//!
//! Everything here is derived on demand from the store; nothing is persisted.

use crate::error::Result;
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use rdj_common::{position_ms, PlaybackState, QueueEntry, RoomId, Track, Versioned};
use serde::Serialize;

/// What one viewer sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomView {
    pub room_id: RoomId,
    pub current_track: Option<Track>,
    /// 1-indexed rank of the viewer's earliest queued request
    pub queue_position: Option<usize>,
    /// Following the shared timeline while something plays
    pub is_live: bool,
    pub paused: bool,
    pub playback_offset_ms: u64,
    /// Playback state version the view was derived from
    pub version: u64,
}

impl RoomView {
    /// View of a viewer that follows the shared timeline
    pub fn following(
        state: &Versioned<PlaybackState>,
        current_track: Option<Track>,
        queue_position: Option<usize>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id: state.record.room_id.clone(),
            current_track,
            queue_position,
            is_live: state.record.is_playing(),
            paused: state.record.paused,
            playback_offset_ms: position_ms(&state.record, now),
            version: state.version,
        }
    }
}

/// Rank of `viewer_id`'s earliest entry in `queue`
pub fn queue_position_of(queue: &[QueueEntry], viewer_id: &str) -> Option<usize> {
    queue
        .iter()
        .position(|e| e.submitter_id == viewer_id)
        .map(|index| index + 1)
}

/// Derive the live view for `viewer_id` straight from the store
pub async fn derive_view(
    store: &dyn StateStore,
    room_id: &str,
    viewer_id: &str,
    now: DateTime<Utc>,
) -> Result<RoomView> {
    let state = store.load_state(room_id).await?;
    let current_track = match state.record.track_id {
        Some(track_id) => store.get_track(track_id).await?,
        None => None,
    };
    let queue = store.list_queue(room_id).await?;
    Ok(RoomView::following(
        &state,
        current_track,
        queue_position_of(&queue, viewer_id),
        now,
    ))
}
