//! Change-notification events
//!
//! Every committed store write produces exactly one `ChangeEvent`, delivered
//! through an `EventBus` to all subscribers in commit order.

mod change_types;

pub use change_types::{ChangeKind, RemovalReason, Table};

use crate::model::{EntryId, HistoryEntry, PlaybackState, QueueEntry, RoomId, Track, TrackId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Row-level change notification
///
/// Events serialize with a `type` tag so they can be forwarded verbatim over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// Playback state record written
    ///
    /// Triggers:
    /// - Viewers: reload or re-anchor local playback
    /// - Scheduler: idle check
    PlaybackStateChanged {
        room_id: RoomId,
        /// Version after the write
        version: u64,
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Entry appended or inserted into a room queue
    QueueEntryAdded {
        room_id: RoomId,
        entry: QueueEntry,
        timestamp: DateTime<Utc>,
    },

    /// Entry left a room queue
    QueueEntryRemoved {
        room_id: RoomId,
        entry_id: EntryId,
        track_id: TrackId,
        reason: RemovalReason,
        timestamp: DateTime<Utc>,
    },

    /// Positions of existing entries shifted to make room for an insertion
    QueueReordered {
        room_id: RoomId,
        /// First position that moved
        from_position: i64,
        timestamp: DateTime<Utc>,
    },

    /// New immutable track stored
    TrackCreated {
        track: Track,
        timestamp: DateTime<Utc>,
    },

    /// Play history row appended
    HistoryAppended {
        room_id: RoomId,
        entry: HistoryEntry,
        timestamp: DateTime<Utc>,
    },

    /// Submitter suspension set (`until = Some`) or lifted (`until = None`)
    SuspensionChanged {
        room_id: RoomId,
        submitter_id: UserId,
        until: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
}

impl ChangeEvent {
    /// Table the change was committed to
    pub fn table(&self) -> Table {
        match self {
            ChangeEvent::PlaybackStateChanged { .. } => Table::PlaybackState,
            ChangeEvent::QueueEntryAdded { .. }
            | ChangeEvent::QueueEntryRemoved { .. }
            | ChangeEvent::QueueReordered { .. } => Table::Queue,
            ChangeEvent::TrackCreated { .. } => Table::Tracks,
            ChangeEvent::HistoryAppended { .. } => Table::History,
            ChangeEvent::SuspensionChanged { .. } => Table::Suspensions,
        }
    }

    /// Row-level change kind
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::PlaybackStateChanged { .. }
            | ChangeEvent::QueueReordered { .. }
            | ChangeEvent::SuspensionChanged { .. } => ChangeKind::Update,
            ChangeEvent::QueueEntryAdded { .. }
            | ChangeEvent::TrackCreated { .. }
            | ChangeEvent::HistoryAppended { .. } => ChangeKind::Insert,
            ChangeEvent::QueueEntryRemoved { .. } => ChangeKind::Delete,
        }
    }

    /// Room the change belongs to (tracks are shared across rooms)
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::PlaybackStateChanged { room_id, .. }
            | ChangeEvent::QueueEntryAdded { room_id, .. }
            | ChangeEvent::QueueEntryRemoved { room_id, .. }
            | ChangeEvent::QueueReordered { room_id, .. }
            | ChangeEvent::HistoryAppended { room_id, .. }
            | ChangeEvent::SuspensionChanged { room_id, .. } => Some(room_id.as_str()),
            ChangeEvent::TrackCreated { .. } => None,
        }
    }

    /// Whether the event concerns `room_id`
    pub fn is_for_room(&self, room_id: &str) -> bool {
        self.room_id().map(|r| r == room_id).unwrap_or(false)
    }

    /// Event type name (SSE `event:` field)
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            ChangeEvent::QueueEntryAdded { .. } => "QueueEntryAdded",
            ChangeEvent::QueueEntryRemoved { .. } => "QueueEntryRemoved",
            ChangeEvent::QueueReordered { .. } => "QueueReordered",
            ChangeEvent::TrackCreated { .. } => "TrackCreated",
            ChangeEvent::HistoryAppended { .. } => "HistoryAppended",
            ChangeEvent::SuspensionChanged { .. } => "SuspensionChanged",
        }
    }
}

/// Change-notification distribution bus
///
/// Wraps `tokio::broadcast`:
/// - Non-blocking publish (slow subscribers don't block writers)
/// - Multiple concurrent subscribers
/// - Lagged subscribers are told how many events they missed and must
///   re-read the store
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
