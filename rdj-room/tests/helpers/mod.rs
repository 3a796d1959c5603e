//! Shared fixtures for rdj-room integration tests
//!
//! - `test_config`: fast timers and a fixed capability table
//! - `CountingStore`: records state reads, promotions, removals and track reads
//! - `FlakyStore`: fails the first N reads with `StoreUnavailable`, and
//!   optionally every history append
//! - seeding helpers for tracks, playback state and queue entries

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdj_common::events::{ChangeEvent, RemovalReason};
use rdj_common::{
    EntryId, HistoryEntry, PlaybackState, QueueEntry, SourceType, Track, TrackId, Versioned,
};
use rdj_room::config::ServiceConfig;
use rdj_room::intake::NullResolver;
use rdj_room::rooms::{Room, RoomRegistry};
use rdj_room::store::{MemoryStore, Promotion, StateStore};
use rdj_room::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const ROOM: &str = "lobby";
pub const CONTROLLER: &str = "dj";
pub const MODERATOR: &str = "mod";

/// Defaults with a long poll interval so polls do not race the test, a short
/// guard timeout and fast store retries
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.scheduler.poll_interval_ms = 60_000;
    config.scheduler.guard_timeout_ms = 1000;
    config.store.retry_base_delay_ms = 1;
    config.auth.controllers = vec![CONTROLLER.to_string()];
    config.auth.moderators = vec![MODERATOR.to_string()];
    config
}

pub fn track(title: &str, duration_ms: Option<u64>) -> Track {
    Track {
        id: Uuid::new_v4(),
        title: title.to_string(),
        source_type: SourceType::DirectAudio,
        media_ref: format!("https://cdn.example.com/{}.mp3", title),
        thumbnail: None,
        duration_ms,
        submitter_id: None,
        dedication: None,
        created_at: Utc::now(),
    }
}

/// Direct-audio link that needs no metadata lookup
pub fn audio_link(name: &str) -> String {
    format!("https://cdn.example.com/music/{}.mp3", name)
}

/// Store `track` and make it the room's playing track, started at `started_at`
pub async fn seed_playing(
    store: &dyn StateStore,
    track: &Track,
    started_at: DateTime<Utc>,
) -> Versioned<PlaybackState> {
    store.insert_track(track).await.unwrap();
    let current = store.load_state(ROOM).await.unwrap();
    store
        .compare_and_set_state(
            current.version,
            PlaybackState::started(ROOM, track.id, started_at, None),
        )
        .await
        .unwrap()
}

/// Store `track` and queue it at `position`
pub async fn seed_queued(
    store: &dyn StateStore,
    track: &Track,
    submitter: &str,
    position: i64,
) -> QueueEntry {
    store.insert_track(track).await.unwrap();
    let entry = QueueEntry {
        id: Uuid::new_v4(),
        room_id: ROOM.to_string(),
        track_id: track.id,
        position,
        submitter_id: submitter.to_string(),
        added_at: Utc::now(),
    };
    store.insert_queue_entry(&entry, None).await.unwrap();
    entry
}

/// Registry over an in-memory store, offline metadata
pub fn registry_with(store: Arc<dyn StateStore>, config: ServiceConfig) -> RoomRegistry {
    let authorizer = Arc::new(rdj_room::auth::StaticAuthorizer::from_config(&config.auth));
    RoomRegistry::new(store, authorizer, Arc::new(NullResolver), config)
}

/// Open the test room on a fresh counting store
pub async fn open_room() -> (RoomRegistry, Arc<Room>, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let registry = registry_with(store.clone(), test_config());
    let room = registry.room(ROOM).await.unwrap();
    (registry, room, store)
}

// ============================================================================
// CountingStore
// ============================================================================

/// Pass-through store that counts state reads, effective promotions, queue
/// removals and track reads
pub struct CountingStore {
    inner: Arc<dyn StateStore>,
    state_reads: AtomicU32,
    promotions: AtomicU32,
    removals: AtomicU32,
    track_reads: Mutex<HashMap<TrackId, u32>>,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            state_reads: AtomicU32::new(0),
            promotions: AtomicU32::new(0),
            removals: AtomicU32::new(0),
            track_reads: Mutex::new(HashMap::new()),
        }
    }

    pub fn state_reads(&self) -> u32 {
        self.state_reads.load(Ordering::SeqCst)
    }

    pub fn promotions(&self) -> u32 {
        self.promotions.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> u32 {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn track_reads(&self, track_id: TrackId) -> u32 {
        self.track_reads
            .lock()
            .unwrap()
            .get(&track_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn load_state(&self, room_id: &str) -> Result<Versioned<PlaybackState>> {
        self.state_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_state(room_id).await
    }

    async fn compare_and_set_state(
        &self,
        expected_version: u64,
        state: PlaybackState,
    ) -> Result<Versioned<PlaybackState>> {
        self.inner.compare_and_set_state(expected_version, state).await
    }

    async fn insert_track(&self, track: &Track) -> Result<()> {
        self.inner.insert_track(track).await
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        *self.track_reads.lock().unwrap().entry(track_id).or_insert(0) += 1;
        self.inner.get_track(track_id).await
    }

    async fn list_queue(&self, room_id: &str) -> Result<Vec<QueueEntry>> {
        self.inner.list_queue(room_id).await
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry, shift_from: Option<i64>) -> Result<()> {
        self.inner.insert_queue_entry(entry, shift_from).await
    }

    async fn delete_queue_entry(
        &self,
        room_id: &str,
        entry_id: EntryId,
        reason: RemovalReason,
    ) -> Result<Option<QueueEntry>> {
        let removed = self.inner.delete_queue_entry(room_id, entry_id, reason).await?;
        if removed.is_some() {
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn promote(&self, promotion: Promotion) -> Result<Versioned<PlaybackState>> {
        let stored = self.inner.promote(promotion).await?;
        self.promotions.fetch_add(1, Ordering::SeqCst);
        self.removals.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        self.inner.append_history(entry).await
    }

    async fn recent_history(&self, room_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.inner.recent_history(room_id, limit).await
    }

    async fn played_count(&self, room_id: &str, submitter_id: &str) -> Result<u64> {
        self.inner.played_count(room_id, submitter_id).await
    }

    async fn get_suspension(&self, room_id: &str, submitter_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.get_suspension(room_id, submitter_id).await
    }

    async fn set_suspension(
        &self,
        room_id: &str,
        submitter_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner.set_suspension(room_id, submitter_id, until).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.subscribe()
    }
}
// ============================================================================
// FlakyStore
// ============================================================================

/// Store whose first `failures` state and queue reads fail as unavailable
pub struct FlakyStore {
    inner: Arc<dyn StateStore>,
    remaining: AtomicU32,
    history_down: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn StateStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            history_down: AtomicBool::new(false),
        }
    }

    /// Fail every history append from now on
    pub fn fail_history(&self) {
        self.history_down.store(true, Ordering::SeqCst);
    }

    fn trip(&self) -> Result<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(Error::StoreUnavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load_state(&self, room_id: &str) -> Result<Versioned<PlaybackState>> {
        self.trip()?;
        self.inner.load_state(room_id).await
    }

    async fn compare_and_set_state(
        &self,
        expected_version: u64,
        state: PlaybackState,
    ) -> Result<Versioned<PlaybackState>> {
        self.inner.compare_and_set_state(expected_version, state).await
    }

    async fn insert_track(&self, track: &Track) -> Result<()> {
        self.inner.insert_track(track).await
    }

    async fn get_track(&self, track_id: TrackId) -> Result<Option<Track>> {
        self.inner.get_track(track_id).await
    }

    async fn list_queue(&self, room_id: &str) -> Result<Vec<QueueEntry>> {
        self.trip()?;
        self.inner.list_queue(room_id).await
    }

    async fn insert_queue_entry(&self, entry: &QueueEntry, shift_from: Option<i64>) -> Result<()> {
        self.inner.insert_queue_entry(entry, shift_from).await
    }

    async fn delete_queue_entry(
        &self,
        room_id: &str,
        entry_id: EntryId,
        reason: RemovalReason,
    ) -> Result<Option<QueueEntry>> {
        self.inner.delete_queue_entry(room_id, entry_id, reason).await
    }

    async fn promote(&self, promotion: Promotion) -> Result<Versioned<PlaybackState>> {
        self.inner.promote(promotion).await
    }

    async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        if self.history_down.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("history unavailable".to_string()));
        }
        self.inner.append_history(entry).await
    }

    async fn recent_history(&self, room_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.inner.recent_history(room_id, limit).await
    }

    async fn played_count(&self, room_id: &str, submitter_id: &str) -> Result<u64> {
        self.inner.played_count(room_id, submitter_id).await
    }

    async fn get_suspension(&self, room_id: &str, submitter_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.get_suspension(room_id, submitter_id).await
    }

    async fn set_suspension(
        &self,
        room_id: &str,
        submitter_id: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner.set_suspension(room_id, submitter_id, until).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.subscribe()
    }
}
