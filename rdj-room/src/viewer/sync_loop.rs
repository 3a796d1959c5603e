//! Per-viewer playback state machine
//!
//! ```text
//! Idle → Loading → Playing ⇄ Paused → Idle (track cleared)
//! ```
//!
//! The loop keeps a local media handle in step with the authoritative
//! playback state. Snapshots are applied as they arrive; a heartbeat
//! re-derives the authoritative position and force-seeks only when the local
//! offset has drifted past the tolerance.
//!
//! A viewer may detach to browse another track locally. While detached the
//! shared state is still tracked but the media handle is left alone and no
//! heartbeat corrections happen.

use super::media::MediaHandle;
use super::read_model::RoomView;
use crate::config::SyncConfig;
use chrono::{DateTime, Utc};
use rdj_common::position::drift_ms;
use rdj_common::{position_ms, PlaybackState, Track, TrackId, UserId, Versioned};
use serde::Serialize;
use std::time::Duration;

/// Local player lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Whether the viewer follows the room or browses on their own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewState {
    Following,
    Detached(TrackId),
}

/// Events a viewer sends upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewerReport {
    /// The live track finished on the controller's player
    TrackEnded { track_id: TrackId },
    /// The controller dragged the seek bar
    SeekRequested { position_ms: u64 },
}

/// One run of a track on the shared timeline
///
/// A replay of the same track, or a resume or seek after the end was
/// reported, starts a new playback.
type PlaybackKey = (TrackId, Option<DateTime<Utc>>, u64);

fn playback_key(state: &PlaybackState) -> Option<PlaybackKey> {
    Some((state.track_id?, state.started_at, state.seek_base_ms))
}

/// Sync state for one viewer
pub struct SyncLoop<M: MediaHandle> {
    viewer_id: UserId,
    privileged: bool,
    config: SyncConfig,
    media: M,
    player: PlayerState,
    view: ViewState,
    live: Option<Versioned<PlaybackState>>,
    live_track: Option<Track>,
    /// Playback whose end was last reported upward
    reported: Option<PlaybackKey>,
}

impl<M: MediaHandle> SyncLoop<M> {
    pub fn new(viewer_id: impl Into<UserId>, privileged: bool, media: M, config: SyncConfig) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            privileged,
            config,
            media,
            player: PlayerState::Idle,
            view: ViewState::Following,
            live: None,
            live_track: None,
            reported: None,
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval()
    }

    pub fn player_state(&self) -> PlayerState {
        self.player
    }

    pub fn view_state(&self) -> ViewState {
        self.view
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut M {
        &mut self.media
    }

    /// Latest authoritative snapshot
    pub fn live_state(&self) -> Option<&Versioned<PlaybackState>> {
        self.live.as_ref()
    }

    /// Whether `track_id` must be fetched before the snapshot naming it can be rendered
    pub fn needs_track(&self, track_id: TrackId) -> bool {
        self.live_track.as_ref().map(|t| t.id) != Some(track_id)
    }

    /// Take a new authoritative snapshot
    ///
    /// `track` is the record for `snapshot.track_id`, if the caller has it.
    /// Snapshots older than the one already applied are ignored.
    pub fn apply(&mut self, snapshot: Versioned<PlaybackState>, track: Option<Track>, now: DateTime<Utc>) -> bool {
        if let Some(current) = &self.live {
            if snapshot.version < current.version {
                return false;
            }
        }

        match snapshot.record.track_id {
            Some(track_id) => {
                if let Some(track) = track.filter(|t| t.id == track_id) {
                    self.live_track = Some(track);
                } else if self.needs_track(track_id) {
                    self.live_track = None;
                }
            }
            None => self.live_track = None,
        }
        self.live = Some(snapshot);

        if self.view == ViewState::Following {
            self.follow(now);
        }
        true
    }

    /// Bring the media handle in line with the live snapshot
    fn follow(&mut self, now: DateTime<Utc>) {
        let Some(live) = &self.live else {
            return;
        };
        let state = &live.record;

        let Some(track_id) = state.track_id else {
            if self.media.loaded().is_some() {
                self.media.unload();
            }
            self.player = PlayerState::Idle;
            return;
        };

        if self.media.loaded() != Some(track_id) {
            self.media.unload();
            self.player = PlayerState::Loading;
            let Some(track) = &self.live_track else {
                // Wait for the track record
                return;
            };
            self.media.load(track);
            self.media.seek(position_ms(state, now));
        }

        if state.paused {
            self.media.pause();
            if self.media.position_ms() != state.seek_base_ms {
                self.media.seek(state.seek_base_ms);
            }
            self.player = PlayerState::Paused;
        } else {
            let target = position_ms(state, now);
            if drift_ms(self.media.position_ms(), target) > self.config.drift_tolerance_ms {
                self.media.seek(target);
            }
            self.media.play();
            self.player = PlayerState::Playing;
        }
    }

    /// Periodic drift check; returns the drift that was corrected, if any
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Option<u64> {
        if self.view != ViewState::Following || self.player != PlayerState::Playing {
            return None;
        }
        let live = self.live.as_ref()?;
        let target = position_ms(&live.record, now);
        let drift = drift_ms(self.media.position_ms(), target);
        if drift > self.config.drift_tolerance_ms {
            self.media.seek(target);
            Some(drift)
        } else {
            None
        }
    }

    /// The local media reached its end
    ///
    /// Only the privileged viewer reports upward, and only once per playback.
    pub fn media_ended(&mut self) -> Option<ViewerReport> {
        self.media.pause();
        if self.view != ViewState::Following {
            return None;
        }
        let key = playback_key(&self.live.as_ref()?.record)?;
        let live_track = key.0;
        if self.media.loaded() != Some(live_track) || !self.privileged || self.reported == Some(key) {
            return None;
        }
        self.reported = Some(key);
        Some(ViewerReport::TrackEnded { track_id: live_track })
    }

    /// The viewer moved the seek bar
    ///
    /// Privileged viewers ask for a shared seek; a detached viewer seeks
    /// locally; anyone else is ignored.
    pub fn request_seek(&mut self, position_ms: u64) -> Option<ViewerReport> {
        match self.view {
            ViewState::Detached(_) => {
                self.media.seek(position_ms);
                None
            }
            ViewState::Following if self.privileged => Some(ViewerReport::SeekRequested { position_ms }),
            ViewState::Following => None,
        }
    }

    /// Detach and play `track` locally
    pub fn browse(&mut self, track: &Track) {
        self.view = ViewState::Detached(track.id);
        self.media.unload();
        self.media.load(track);
        self.media.play();
        self.player = PlayerState::Playing;
    }

    /// Resume following the shared timeline
    pub fn return_to_live(&mut self, now: DateTime<Utc>) {
        if self.view == ViewState::Following {
            return;
        }
        self.view = ViewState::Following;
        self.media.unload();
        self.player = PlayerState::Idle;
        self.follow(now);
    }

    /// Release the media handle
    pub fn teardown(&mut self) {
        self.media.unload();
        self.player = PlayerState::Idle;
        self.live = None;
        self.live_track = None;
    }

    /// Current read model for this viewer
    pub fn view(&self, room_id: &str, queue_position: Option<usize>, now: DateTime<Utc>) -> RoomView {
        match (&self.live, self.view) {
            (Some(live), ViewState::Following) => {
                RoomView::following(live, self.live_track.clone(), queue_position, now)
            }
            (live, _) => RoomView {
                room_id: room_id.to_string(),
                current_track: self.live_track.clone(),
                queue_position,
                is_live: false,
                paused: live.as_ref().map(|l| l.record.paused).unwrap_or(true),
                playback_offset_ms: self.media.position_ms(),
                version: live.as_ref().map(|l| l.version).unwrap_or(0),
            },
        }
    }
}
