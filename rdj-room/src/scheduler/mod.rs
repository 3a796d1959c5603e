//! Autonomous scheduler
//!
//! One task per room consumes every advancement trigger from a single
//! channel: store change notifications, a fixed-interval poll, track-ended
//! reports and inline kicks from intake. The task calls into `AutoDj`, whose
//! `advance()` is idempotent, so duplicate triggers are harmless.
//!
//! Poll and notification triggers arriving within the coalescing window of
//! the previous advance are dropped. Track-ended reports and kicks always run.

pub mod advance;
pub mod guard;

pub use advance::{AdvanceOutcome, AutoDj};
pub use guard::{AdvanceGuard, GuardPermit};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use rdj_common::events::ChangeEvent;
use rdj_common::TrackId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the trigger channel
const TRIGGER_CHANNEL_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<AdvanceOutcome>>;

/// Reason the scheduler should look at the room
#[derive(Debug)]
pub enum Trigger {
    /// Playback state changed
    StateChanged,
    /// Queue gained an entry or was reordered
    QueueChanged,
    /// Fixed-interval poll
    Poll,
    /// The controller's player finished `track_id`
    TrackEnded {
        track_id: TrackId,
        reply: Option<Reply>,
    },
    /// Intake wants an immediate advance
    Kick { reply: Reply },
}

impl Trigger {
    fn bypasses_coalescing(&self) -> bool {
        matches!(self, Trigger::TrackEnded { .. } | Trigger::Kick { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Trigger::StateChanged => "state_changed",
            Trigger::QueueChanged => "queue_changed",
            Trigger::Poll => "poll",
            Trigger::TrackEnded { .. } => "track_ended",
            Trigger::Kick { .. } => "kick",
        }
    }
}

/// Map a store notification to a trigger for `room_id`
fn trigger_for(event: &ChangeEvent, room_id: &str) -> Option<Trigger> {
    if !event.is_for_room(room_id) {
        return None;
    }
    match event {
        ChangeEvent::PlaybackStateChanged { .. } => Some(Trigger::StateChanged),
        ChangeEvent::QueueEntryAdded { .. } | ChangeEvent::QueueReordered { .. } => {
            Some(Trigger::QueueChanged)
        }
        _ => None,
    }
}

/// Sending side of a room scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Trigger>,
    inline_timeout: Duration,
}

impl SchedulerHandle {
    /// Advance now and wait (bounded) for the outcome
    ///
    /// Returns `Deferred` if the scheduler does not answer in time; the
    /// next poll picks the work up.
    pub async fn kick(&self) -> Result<AdvanceOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Trigger::Kick { reply }).await?;
        self.await_reply(rx).await
    }

    /// Report that `track_id` finished and wait for the resulting advance
    pub async fn track_ended(&self, track_id: TrackId) -> Result<AdvanceOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Trigger::TrackEnded {
            track_id,
            reply: Some(reply),
        })
        .await?;
        self.await_reply(rx).await
    }

    /// Fire-and-forget trigger; dropped if the channel is full
    pub fn notify(&self, trigger: Trigger) {
        if let Err(e) = self.tx.try_send(trigger) {
            debug!("Scheduler trigger dropped: {}", e);
        }
    }

    async fn send(&self, trigger: Trigger) -> Result<()> {
        self.tx
            .send(trigger)
            .await
            .map_err(|_| Error::Internal("scheduler task has stopped".to_string()))
    }

    async fn await_reply(&self, rx: oneshot::Receiver<Result<AdvanceOutcome>>) -> Result<AdvanceOutcome> {
        match tokio::time::timeout(self.inline_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Internal("scheduler dropped the request".to_string())),
            Err(_) => Ok(AdvanceOutcome::Deferred),
        }
    }
}

/// Single-consumer scheduler task for one room
pub struct Scheduler {
    dj: Arc<AutoDj>,
    rx: mpsc::Receiver<Trigger>,
    events: broadcast::Receiver<ChangeEvent>,
    config: SchedulerConfig,
    last_advance: Option<Instant>,
}

impl Scheduler {
    /// Create the task state and its handle
    ///
    /// `events` should be subscribed before the room's first write so no
    /// notification is missed.
    pub fn new(
        dj: Arc<AutoDj>,
        events: broadcast::Receiver<ChangeEvent>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let handle = SchedulerHandle {
            tx,
            inline_timeout: config.inline_advance_timeout(),
        };
        let scheduler = Self {
            dj,
            rx,
            events,
            config,
            last_advance: None,
        };
        (scheduler, handle)
    }

    /// Run until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let room_id = self.dj.room_id().to_string();
        info!("Scheduler started for {}", room_id);

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;
        let mut triggers_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll.tick() => self.handle(Trigger::Poll).await,
                trigger = self.rx.recv(), if triggers_open => match trigger {
                    Some(trigger) => self.handle(trigger).await,
                    None => triggers_open = false,
                },
                event = self.events.recv(), if events_open => match event {
                    Ok(event) => {
                        if let Some(trigger) = trigger_for(&event, &room_id) {
                            debug!("{} in {} ({})", event.event_type(), room_id, event.table());
                            self.handle(trigger).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Scheduler for {} missed {} notifications; re-reading", room_id, missed);
                        self.handle(Trigger::StateChanged).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Change notifications closed for {}; polling only", room_id);
                        events_open = false;
                    }
                },
            }
        }

        info!("Scheduler stopped for {}", room_id);
    }

    async fn handle(&mut self, trigger: Trigger) {
        if !trigger.bypasses_coalescing() {
            if let Some(last) = self.last_advance {
                if last.elapsed() < self.config.coalesce_window() {
                    return;
                }
            }
        }

        let name = trigger.name();
        let (outcome, reply) = match trigger {
            Trigger::TrackEnded { track_id, reply } => (self.dj.end_track(track_id).await, reply),
            Trigger::Kick { reply } => (self.dj.advance().await, Some(reply)),
            _ => (self.dj.advance().await, None),
        };
        self.last_advance = Some(Instant::now());

        match &outcome {
            Ok(AdvanceOutcome::Promoted { track_id, .. }) => {
                debug!("{}: promoted {} in {}", name, track_id, self.dj.room_id())
            }
            Ok(other) => debug!("{}: {:?} in {}", name, other, self.dj.room_id()),
            Err(e) => error!("{}: advance failed in {}: {}", name, self.dj.room_id(), e),
        }

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rdj_common::events::RemovalReason;
    use rdj_common::PlaybackState;
    use uuid::Uuid;

    #[test]
    fn test_notifications_map_to_triggers() {
        let state = ChangeEvent::PlaybackStateChanged {
            room_id: "lobby".to_string(),
            version: 2,
            state: PlaybackState::idle("lobby", Utc::now()),
            timestamp: Utc::now(),
        };
        assert!(matches!(trigger_for(&state, "lobby"), Some(Trigger::StateChanged)));
        assert!(trigger_for(&state, "other").is_none());

        let removed = ChangeEvent::QueueEntryRemoved {
            room_id: "lobby".to_string(),
            entry_id: Uuid::new_v4(),
            track_id: Uuid::new_v4(),
            reason: RemovalReason::Withdrawn,
            timestamp: Utc::now(),
        };
        assert!(trigger_for(&removed, "lobby").is_none());
    }

    #[test]
    fn test_only_direct_triggers_bypass_coalescing() {
        let (reply, _rx) = oneshot::channel();
        assert!(Trigger::Kick { reply }.bypasses_coalescing());
        assert!(Trigger::TrackEnded { track_id: Uuid::new_v4(), reply: None }.bypasses_coalescing());
        assert!(!Trigger::Poll.bypasses_coalescing());
        assert!(!Trigger::QueueChanged.bypasses_coalescing());
    }
}
