//! State store access layer
//!
//! The store holds one `PlaybackState` per room, the room queues, immutable
//! tracks, play history and submitter suspensions. Every committed write emits
//! exactly one change event per affected row, in commit order.
//!
//! Two adapters are provided:
//! - `MemoryStore`: process-local, used for tests and ephemeral deployments
//! - `SqliteStore`: durable, backed by sqlx/SQLite

pub mod memory;
pub mod retry;
pub mod sqlite;

pub use memory::MemoryStore;
pub use retry::{with_retry, RetryPolicy};
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdj_common::events::{ChangeEvent, RemovalReason};
use rdj_common::{EntryId, HistoryEntry, PlaybackState, QueueEntry, Track, TrackId, Versioned};
use tokio::sync::broadcast;

/// Atomic claim-and-promote request
///
/// Applied as one unit: the queue entry is removed, the playback state is
/// written (if still at `expected_version`) and a history row is appended.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub entry_id: EntryId,
    pub expected_version: u64,
    pub state: PlaybackState,
    pub history: HistoryEntry,
}

/// Durable keyed record store with row-level change notification
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a room's playback state; a room without a record reads as idle at version 0
    async fn load_state(&self, room_id: &str) -> Result<Versioned<PlaybackState>>;

    /// Optimistic update: `Error::Conflict` unless the stored version equals `expected_version`
    async fn compare_and_set_state(
        &self,
        expected_version: u64,
        state: PlaybackState,
    ) -> Result<Versioned<PlaybackState>>;

    /// Store a new immutable track
    async fn insert_track(&self, track: &Track) -> Result<()>;

    async fn get_track(&self, track_id: TrackId) -> Result<Option<Track>>;

    /// Room queue ordered by `(position, added_at)`
    async fn list_queue(&self, room_id: &str) -> Result<Vec<QueueEntry>>;

    /// Insert a queue entry
    ///
    /// With `shift_from = Some(p)`, entries at `position >= p` first move down
    /// by one. An occupied position yields `Error::Conflict`.
    async fn insert_queue_entry(&self, entry: &QueueEntry, shift_from: Option<i64>) -> Result<()>;

    /// Remove a queue entry, returning it if it was still present
    async fn delete_queue_entry(
        &self,
        room_id: &str,
        entry_id: EntryId,
        reason: RemovalReason,
    ) -> Result<Option<QueueEntry>>;

    /// Claim a queue entry and make it the playing track
    ///
    /// `Error::RaceLost` if the entry is already gone, `Error::Conflict` if the
    /// playback state moved past `expected_version`. Neither case changes anything.
    async fn promote(&self, promotion: Promotion) -> Result<Versioned<PlaybackState>>;

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()>;

    /// Most recent plays first
    async fn recent_history(&self, room_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Number of history rows credited to `submitter_id` in the room
    async fn played_count(&self, room_id: &str, submitter_id: &str) -> Result<u64>;

    async fn get_suspension(&self, room_id: &str, submitter_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Set (`Some`) or lift (`None`) a submitter suspension
    async fn set_suspension(
        &self,
        room_id: &str,
        submitter_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Subscribe to change notifications for all tables and rooms
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
