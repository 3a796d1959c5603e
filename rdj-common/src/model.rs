//! Room data model
//!
//! Records held by the state store: one `PlaybackState` per room, the room's
//! ordered queue, immutable tracks, and the play history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Room identifier (opaque, chosen by whoever creates the room)
pub type RoomId = String;

/// User identifier, as asserted by the upstream identity layer
pub type UserId = String;

/// Track identifier
pub type TrackId = Uuid;

/// Queue entry identifier
pub type EntryId = Uuid;

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    YouTube,
    SoundCloud,
    DirectAudio,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::YouTube => "youtube",
            SourceType::SoundCloud => "soundcloud",
            SourceType::DirectAudio => "direct_audio",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "youtube" => Some(SourceType::YouTube),
            "soundcloud" => Some(SourceType::SoundCloud),
            "direct_audio" => Some(SourceType::DirectAudio),
            _ => None,
        }
    }

    /// Title used when metadata resolution fails
    pub fn generic_title(self) -> &'static str {
        match self {
            SourceType::YouTube => "YouTube video",
            SourceType::SoundCloud => "SoundCloud track",
            SourceType::DirectAudio => "Audio file",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A playable track
///
/// Tracks are immutable once stored. Editing a track means creating a new one,
/// so history rows keep pointing at what was actually played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub source_type: SourceType,
    /// Canonical media reference (normalized link)
    pub media_ref: String,
    pub thumbnail: Option<String>,
    pub duration_ms: Option<u64>,
    pub submitter_id: Option<UserId>,
    pub dedication: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authoritative playback record (one per room)
///
/// While `paused` the effective position is exactly `seek_base_ms`. While
/// playing it is `seek_base_ms + (now - started_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub room_id: RoomId,
    pub track_id: Option<TrackId>,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub seek_base_ms: u64,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl PlaybackState {
    /// Idle record: no track, paused, anchored at zero
    pub fn idle(room_id: impl Into<RoomId>, at: DateTime<Utc>) -> Self {
        Self {
            room_id: room_id.into(),
            track_id: None,
            paused: true,
            started_at: None,
            seek_base_ms: 0,
            updated_by: None,
            updated_at: at,
        }
    }

    /// A track is loaded and the timeline is advancing
    pub fn is_playing(&self) -> bool {
        self.track_id.is_some() && !self.paused
    }

    /// Record with no track loaded
    pub fn is_cleared(&self) -> bool {
        self.track_id.is_none()
    }

    /// Fresh record that starts `track_id` from zero at `at`
    pub fn started(
        room_id: impl Into<RoomId>,
        track_id: TrackId,
        at: DateTime<Utc>,
        updated_by: Option<UserId>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            track_id: Some(track_id),
            paused: false,
            started_at: Some(at),
            seek_base_ms: 0,
            updated_by,
            updated_at: at,
        }
    }
}

/// A record together with its optimistic-concurrency version
///
/// The version increments on every committed write; a missing record reads
/// as version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// A queued request
///
/// `position` is unique per room; the queue is ordered by `(position, added_at)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub room_id: RoomId,
    pub track_id: TrackId,
    pub position: i64,
    pub submitter_id: UserId,
    pub added_at: DateTime<Utc>,
}

/// How a history row came to be played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaySource {
    /// Promoted from the request queue by the scheduler
    Queue,
    /// Set directly by the room controller
    Controller,
}

impl PlaySource {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaySource::Queue => "queue",
            PlaySource::Controller => "controller",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "queue" => Some(PlaySource::Queue),
            "controller" => Some(PlaySource::Controller),
            _ => None,
        }
    }
}

/// One played track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub room_id: RoomId,
    pub track_id: TrackId,
    pub submitter_id: Option<UserId>,
    pub started_at: DateTime<Utc>,
    pub source: PlaySource,
}

/// Per-submitter intake accounting (derived from queue, history and suspensions)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterQuota {
    pub submitter_id: UserId,
    pub current_queue_count: usize,
    pub total_played: u64,
    pub suspended_until: Option<DateTime<Utc>>,
}

impl SubmitterQuota {
    /// Suspension is in force at `now`
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.map(|until| until > now).unwrap_or(false)
    }
}
