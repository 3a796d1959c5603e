//! Local media handle abstraction
//!
//! The sync loop drives whatever actually renders audio or video through
//! this trait. Decoding and output are out of scope here.

use rdj_common::{Track, TrackId};
use tokio::time::Instant;

/// A viewer's local player
pub trait MediaHandle: Send {
    /// Replace whatever is loaded with `track`, positioned at zero and not playing
    fn load(&mut self, track: &Track);

    /// Release the loaded media
    fn unload(&mut self);

    fn loaded(&self) -> Option<TrackId>;

    fn play(&mut self);

    fn pause(&mut self);

    fn seek(&mut self, position_ms: u64);

    /// Current local playback offset
    fn position_ms(&self) -> u64;
}

/// In-memory player that advances with the tokio clock
///
/// Used by headless viewers and tests. `stall` and `jump` simulate buffering
/// stalls and local clock skew.
#[derive(Debug, Default)]
pub struct SimulatedMedia {
    track_id: Option<TrackId>,
    base_ms: u64,
    playing_since: Option<Instant>,
    seeks: u32,
}

impl SimulatedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing_since.is_some()
    }

    /// Number of seeks applied since creation
    pub fn seek_count(&self) -> u32 {
        self.seeks
    }

    /// Lose `ms` of progress, as if playback stalled
    pub fn stall(&mut self, ms: u64) {
        let current = self.position_ms();
        self.set_base(current.saturating_sub(ms));
    }

    /// Run ahead by `ms`
    pub fn jump(&mut self, ms: u64) {
        let current = self.position_ms();
        self.set_base(current.saturating_add(ms));
    }

    fn set_base(&mut self, position_ms: u64) {
        self.base_ms = position_ms;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }
}

impl MediaHandle for SimulatedMedia {
    fn load(&mut self, track: &Track) {
        self.track_id = Some(track.id);
        self.base_ms = 0;
        self.playing_since = None;
    }

    fn unload(&mut self) {
        self.track_id = None;
        self.base_ms = 0;
        self.playing_since = None;
    }

    fn loaded(&self) -> Option<TrackId> {
        self.track_id
    }

    fn play(&mut self) {
        if self.track_id.is_some() && self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        self.base_ms = self.position_ms();
        self.playing_since = None;
    }

    fn seek(&mut self, position_ms: u64) {
        self.seeks += 1;
        self.set_base(position_ms);
    }

    fn position_ms(&self) -> u64 {
        let elapsed = self
            .playing_since
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.base_ms.saturating_add(elapsed)
    }
}
