//! In-process state store
//!
//! All tables live behind a single `RwLock`. Change events are emitted while
//! the write lock is still held, so subscribers observe them in commit order.

use super::{Promotion, StateStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdj_common::events::{ChangeEvent, EventBus, RemovalReason};
use rdj_common::{
    EntryId, HistoryEntry, PlaybackState, QueueEntry, RoomId, Track, TrackId, UserId, Versioned,
};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

#[derive(Default)]
struct Tables {
    states: HashMap<RoomId, Versioned<PlaybackState>>,
    tracks: HashMap<TrackId, Track>,
    queues: HashMap<RoomId, Vec<QueueEntry>>,
    history: HashMap<RoomId, Vec<HistoryEntry>>,
    suspensions: HashMap<(RoomId, UserId), DateTime<Utc>>,
}

impl Tables {
    fn current_version(&self, room_id: &str) -> u64 {
        self.states.get(room_id).map(|s| s.version).unwrap_or(0)
    }

    fn write_state(&mut self, expected_version: u64, state: PlaybackState) -> Result<Versioned<PlaybackState>> {
        let current = self.current_version(&state.room_id);
        if current != expected_version {
            return Err(Error::Conflict(format!(
                "playback state for {} is at version {}, expected {}",
                state.room_id, current, expected_version
            )));
        }
        let stored = Versioned {
            version: current + 1,
            record: state,
        };
        self.states.insert(stored.record.room_id.clone(), stored.clone());
        Ok(stored)
    }
}

/// Memory-backed `StateStore`
pub struct MemoryStore {
    tables: RwLock<Tables>,
    bus: EventBus,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            bus: EventBus::default(),
        }
    }

    fn state_changed(&self, stored: &Versioned<PlaybackState>) {
        self.bus.emit_lossy(ChangeEvent::PlaybackStateChanged {
            room_id: stored.record.room_id.clone(),
            version: stored.version,
            state: stored.record.clone(),
            timestamp: Utc::now(),
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_state(&self, room_id: &str) -> Result<Versioned<PlaybackState>> {
        let tables = self.tables.read().await;
        Ok(tables.states.get(room_id).cloned().unwrap_or_else(|| Versioned {
            version: 0,
            record: PlaybackState::idle(room_id, Utc::now()),
        }))
    }

    async fn compare_and_set_state(
        &self,
        expected_version: u64,
        state: PlaybackState,
    ) -> Result<Versioned<PlaybackState>> {
        let mut tables = self.tables.write().await;
        let stored = tables.write_state(expected_version, state)?;
        self.state_changed(&stored);
        Ok(stored)
    }

    async fn insert_track(&self, track: &Track) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.tracks.contains_key(&track.id) {
            return Err(Error::Conflict(format!("track {} already exists", track.id)));
        }
        tables.tracks.insert(track.id, track.clone());
        self.bus.emit_lossy(ChangeEvent::TrackCreated {
            track: track.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        Ok(self.tables.read().await.tracks.get(&track_id).cloned())
    }

    async fn list_queue(&self, room_id: &str) -> Result<Vec<QueueEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.queues.get(room_id).cloned().unwrap_or_default())
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry, shift_from: Option<i64>) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.tracks.contains_key(&entry.track_id) {
            return Err(Error::NotFound(format!("track {}", entry.track_id)));
        }
        let queue = tables.queues.entry(entry.room_id.clone()).or_default();

        if let Some(from) = shift_from {
            for existing in queue.iter_mut().filter(|e| e.position >= from) {
                existing.position += 1;
            }
        }
        if queue.iter().any(|e| e.position == entry.position) {
            // Undo the shift so a failed insert leaves no trace
            if let Some(from) = shift_from {
                for existing in queue.iter_mut().filter(|e| e.position > from) {
                    existing.position -= 1;
                }
            }
            return Err(Error::Conflict(format!(
                "queue position {} already taken in {}",
                entry.position, entry.room_id
            )));
        }

        queue.push(entry.clone());
        queue.sort_by(|a, b| a.position.cmp(&b.position).then(a.added_at.cmp(&b.added_at)));

        if let Some(from) = shift_from {
            self.bus.emit_lossy(ChangeEvent::QueueReordered {
                room_id: entry.room_id.clone(),
                from_position: from,
                timestamp: Utc::now(),
            });
        }
        self.bus.emit_lossy(ChangeEvent::QueueEntryAdded {
            room_id: entry.room_id.clone(),
            entry: entry.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn delete_queue_entry(
        &self,
        room_id: &str,
        entry_id: EntryId,
        reason: RemovalReason,
    ) -> Result<Option<QueueEntry>> {
        let mut tables = self.tables.write().await;
        let Some(queue) = tables.queues.get_mut(room_id) else {
            return Ok(None);
        };
        let Some(index) = queue.iter().position(|e| e.id == entry_id) else {
            return Ok(None);
        };
        let removed = queue.remove(index);
        self.bus.emit_lossy(ChangeEvent::QueueEntryRemoved {
            room_id: room_id.to_string(),
            entry_id,
            track_id: removed.track_id,
            reason,
            timestamp: Utc::now(),
        });
        Ok(Some(removed))
    }

    async fn promote(&self, promotion: Promotion) -> Result<Versioned<PlaybackState>> {
        let Promotion {
            entry_id,
            expected_version,
            state,
            history,
        } = promotion;
        let room_id = state.room_id.clone();

        let mut tables = self.tables.write().await;
        let index = tables
            .queues
            .get(&room_id)
            .and_then(|q| q.iter().position(|e| e.id == entry_id))
            .ok_or_else(|| Error::RaceLost(format!("queue entry {} already consumed", entry_id)))?;

        let current = tables.current_version(&room_id);
        if current != expected_version {
            return Err(Error::Conflict(format!(
                "playback state for {} is at version {}, expected {}",
                room_id, current, expected_version
            )));
        }

        let removed = match tables.queues.get_mut(&room_id) {
            Some(queue) => queue.remove(index),
            None => return Err(Error::Internal("queue vanished under write lock".to_string())),
        };
        let stored = tables.write_state(expected_version, state)?;
        tables.history.entry(room_id.clone()).or_default().push(history.clone());

        self.bus.emit_lossy(ChangeEvent::QueueEntryRemoved {
            room_id: room_id.clone(),
            entry_id,
            track_id: removed.track_id,
            reason: RemovalReason::Promoted,
            timestamp: Utc::now(),
        });
        self.state_changed(&stored);
        self.bus.emit_lossy(ChangeEvent::HistoryAppended {
            room_id,
            entry: history,
            timestamp: Utc::now(),
        });
        Ok(stored)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .history
            .entry(entry.room_id.clone())
            .or_default()
            .push(entry.clone());
        self.bus.emit_lossy(ChangeEvent::HistoryAppended {
            room_id: entry.room_id.clone(),
            entry: entry.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn recent_history(&self, room_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .get(room_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn played_count(&self, room_id: &str, submitter_id: &str) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .get(room_id)
            .map(|h| {
                h.iter()
                    .filter(|e| e.submitter_id.as_deref() == Some(submitter_id))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn get_suspension(&self, room_id: &str, submitter_id: &str) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.read().await;
        Ok(tables
            .suspensions
            .get(&(room_id.to_string(), submitter_id.to_string()))
            .copied())
    }

    async fn set_suspension(
        &self,
        room_id: &str,
        submitter_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let key = (room_id.to_string(), submitter_id.to_string());
        match until {
            Some(until) => {
                tables.suspensions.insert(key, until);
            }
            None => {
                tables.suspensions.remove(&key);
            }
        }
        self.bus.emit_lossy(ChangeEvent::SuspensionChanged {
            room_id: room_id.to_string(),
            submitter_id: submitter_id.to_string(),
            until,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.bus.subscribe()
    }
}
