//! Playback position calculation
//!
//! Maps a `PlaybackState` snapshot and a wall-clock instant to a playback
//! offset in milliseconds. The scheduler, the control surface and every viewer
//! call these functions; there is no other place that derives a position.

use crate::model::PlaybackState;
use crate::time::elapsed_ms;
use chrono::{DateTime, Utc};

/// Authoritative playback offset in milliseconds
///
/// - No track loaded → 0
/// - Paused → `seek_base_ms` (no extrapolation)
/// - Playing → `seek_base_ms + max(0, now - started_at)`
///
/// A playing record without `started_at` does not advance.
pub fn position_ms(state: &PlaybackState, now: DateTime<Utc>) -> u64 {
    if state.track_id.is_none() {
        return 0;
    }
    if state.paused {
        return state.seek_base_ms;
    }
    let elapsed = state
        .started_at
        .map(|started| elapsed_ms(started, now))
        .unwrap_or(0);
    state.seek_base_ms.saturating_add(elapsed)
}

/// Whether the loaded track has run out
///
/// A paused track is exhausted once its anchor reached the known duration.
/// A playing track is exhausted once the computed position overran the known
/// duration by more than `overrun_grace_ms`. Unknown durations never exhaust.
pub fn is_exhausted(
    state: &PlaybackState,
    duration_ms: Option<u64>,
    now: DateTime<Utc>,
    overrun_grace_ms: u64,
) -> bool {
    let Some(duration) = duration_ms else {
        return false;
    };
    if state.track_id.is_none() {
        return false;
    }
    if state.paused {
        state.seek_base_ms >= duration
    } else {
        position_ms(state, now) > duration.saturating_add(overrun_grace_ms)
    }
}

/// Absolute distance between a local media offset and the authoritative one
pub fn drift_ms(local_ms: u64, authoritative_ms: u64) -> u64 {
    local_ms.abs_diff(authoritative_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::add_ms;
    use uuid::Uuid;

    fn playing_from(start: DateTime<Utc>, seek_base_ms: u64) -> PlaybackState {
        let mut state = PlaybackState::started("room", Uuid::new_v4(), start, None);
        state.seek_base_ms = seek_base_ms;
        state
    }

    #[test]
    fn test_position_without_track_is_zero() {
        let now = Utc::now();
        let mut state = PlaybackState::idle("room", now);
        state.seek_base_ms = 42_000;
        state.paused = false;
        state.started_at = Some(now);
        assert_eq!(position_ms(&state, add_ms(now, 5_000)), 0);
    }

    #[test]
    fn test_position_paused_returns_anchor() {
        let now = Utc::now();
        let mut state = playing_from(now, 12_345);
        state.paused = true;
        state.started_at = None;
        assert_eq!(position_ms(&state, add_ms(now, 60_000)), 12_345);
    }

    #[test]
    fn test_position_playing_extrapolates() {
        let start = Utc::now();
        let state = playing_from(start, 1_000);
        assert_eq!(position_ms(&state, add_ms(start, 2_500)), 3_500);
    }

    #[test]
    fn test_position_clamps_clock_skew() {
        let start = Utc::now();
        let state = playing_from(start, 7_000);
        let before_start = start - chrono::Duration::milliseconds(900);
        assert_eq!(position_ms(&state, before_start), 7_000);
    }

    #[test]
    fn test_position_non_decreasing_while_playing() {
        let start = Utc::now();
        let state = playing_from(start, 500);
        let mut last = 0;
        for step in 0..200u64 {
            let now = add_ms(start, step * 37);
            let pos = position_ms(&state, now);
            assert!(pos >= last, "position went backwards at step {}", step);
            last = pos;
        }
    }

    #[test]
    fn test_exhausted_paused_at_end() {
        let now = Utc::now();
        let mut state = playing_from(now, 180_000);
        state.paused = true;
        assert!(is_exhausted(&state, Some(180_000), now, 5_000));
        state.seek_base_ms = 90_000;
        assert!(!is_exhausted(&state, Some(180_000), now, 5_000));
    }

    #[test]
    fn test_exhausted_playing_respects_grace() {
        let start = Utc::now();
        let state = playing_from(start, 0);
        assert!(!is_exhausted(&state, Some(10_000), add_ms(start, 14_000), 5_000));
        assert!(is_exhausted(&state, Some(10_000), add_ms(start, 15_001), 5_000));
    }

    #[test]
    fn test_unknown_duration_never_exhausts() {
        let start = Utc::now();
        let state = playing_from(start, 0);
        assert!(!is_exhausted(&state, None, add_ms(start, 86_400_000), 0));
    }

    #[test]
    fn test_drift_is_symmetric() {
        assert_eq!(drift_ms(10_000, 12_500), 2_500);
        assert_eq!(drift_ms(12_500, 10_000), 2_500);
        assert_eq!(drift_ms(3, 3), 0);
    }
}
