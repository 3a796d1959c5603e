//! # Room DJ Common Library
//!
//! Shared code for the room playback service and its viewer clients:
//! - Data model (playback state, queue entries, tracks, history)
//! - Position calculation (the single authoritative playback offset)
//! - Change-notification event types and the EventBus
//! - Configuration file resolution
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod position;
pub mod time;

pub use error::{Error, Result};
pub use model::{
    EntryId, HistoryEntry, PlaySource, PlaybackState, QueueEntry, RoomId, SourceType,
    SubmitterQuota, Track, TrackId, UserId, Versioned,
};
pub use position::position_ms;
