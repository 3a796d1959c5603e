//! Viewer-side synchronization
//!
//! `SyncLoop` is the per-viewer state machine; `spawn_viewer` runs one as an
//! async task fed by the store's change notifications and a heartbeat timer,
//! publishing the viewer's read model on a watch channel.

pub mod media;
pub mod read_model;
pub mod sync_loop;

pub use media::{MediaHandle, SimulatedMedia};
pub use read_model::{derive_view, queue_position_of, RoomView};
pub use sync_loop::{PlayerState, SyncLoop, ViewState, ViewerReport};

use crate::error::Result;
use crate::store::StateStore;
use chrono::Utc;
use rdj_common::events::ChangeEvent;
use rdj_common::{RoomId, TrackId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Local actions from the viewer's UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerCommand {
    /// The media element fired its end event
    MediaEnded,
    /// Seek bar moved
    Seek(u64),
    /// Detach and play an older track
    Browse(TrackId),
    ReturnToLive,
}

/// Handle to a running viewer task
pub struct ViewerHandle {
    commands: mpsc::Sender<ViewerCommand>,
    view: watch::Receiver<RoomView>,
    cancel: CancellationToken,
}

impl ViewerHandle {
    pub async fn send(&self, command: ViewerCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Latest published read model
    pub fn view(&self) -> RoomView {
        self.view.borrow().clone()
    }

    /// Watch the read model for changes
    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    /// Stop the task; it releases the media handle and unsubscribes
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct ViewerTask<M: MediaHandle> {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    sync: SyncLoop<M>,
    queue_position: Option<usize>,
    reports: mpsc::Sender<ViewerReport>,
    view_tx: watch::Sender<RoomView>,
}

impl<M: MediaHandle> ViewerTask<M> {
    /// Re-read state, current track and queue rank from the store
    async fn refresh(&mut self) -> Result<()> {
        let state = self.store.load_state(&self.room_id).await?;
        let track = match state.record.track_id {
            Some(track_id) if self.sync.needs_track(track_id) => self.store.get_track(track_id).await?,
            _ => None,
        };
        self.sync.apply(state, track, Utc::now());
        self.refresh_queue_position().await
    }

    async fn refresh_queue_position(&mut self) -> Result<()> {
        let queue = self.store.list_queue(&self.room_id).await?;
        self.queue_position = queue_position_of(&queue, self.sync.viewer_id());
        Ok(())
    }

    async fn on_event(&mut self, event: ChangeEvent) -> Result<()> {
        if !event.is_for_room(&self.room_id) {
            return Ok(());
        }
        match event {
            ChangeEvent::PlaybackStateChanged { version, state, .. } => {
                let track = match state.track_id {
                    Some(track_id) if self.sync.needs_track(track_id) => {
                        self.store.get_track(track_id).await?
                    }
                    _ => None,
                };
                self.sync.apply(
                    rdj_common::Versioned {
                        version,
                        record: state,
                    },
                    track,
                    Utc::now(),
                );
            }
            ChangeEvent::QueueEntryAdded { .. }
            | ChangeEvent::QueueEntryRemoved { .. }
            | ChangeEvent::QueueReordered { .. } => self.refresh_queue_position().await?,
            _ => {}
        }
        Ok(())
    }

    async fn on_command(&mut self, command: ViewerCommand) -> Result<()> {
        let report = match command {
            ViewerCommand::MediaEnded => self.sync.media_ended(),
            ViewerCommand::Seek(position_ms) => self.sync.request_seek(position_ms),
            ViewerCommand::Browse(track_id) => {
                match self.store.get_track(track_id).await? {
                    Some(track) => self.sync.browse(&track),
                    None => warn!("Cannot browse unknown track {}", track_id),
                }
                None
            }
            ViewerCommand::ReturnToLive => {
                self.sync.return_to_live(Utc::now());
                None
            }
        };
        if let Some(report) = report {
            if self.reports.send(report).await.is_err() {
                debug!("Report receiver for {} is gone", self.sync.viewer_id());
            }
        }
        Ok(())
    }

    fn publish(&self) {
        let view = self.sync.view(&self.room_id, self.queue_position, Utc::now());
        self.view_tx.send_replace(view);
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ViewerCommand>, cancel: CancellationToken) -> SyncLoop<M> {
        let mut events = self.store.subscribe();
        if let Err(e) = self.refresh().await {
            warn!("Initial sync for {} in {} failed: {}", self.sync.viewer_id(), self.room_id, e);
        }
        self.publish();

        let period = self.sync.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    if let Some(drift) = self.sync.heartbeat(Utc::now()) {
                        debug!("{} drifted {}ms; resynced", self.sync.viewer_id(), drift);
                    }
                    Ok(())
                }
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("{} missed {} notifications; re-reading", self.sync.viewer_id(), missed);
                        self.refresh().await
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events_open = false;
                        Ok(())
                    }
                },
            };
            if let Err(e) = outcome {
                warn!("Viewer {} in {}: {}", self.sync.viewer_id(), self.room_id, e);
            }
            self.publish();
        }

        drop(events);
        self.sync.teardown();
        self.publish();
        self.sync
    }
}

/// Run `sync` for `room_id` until the handle is shut down
///
/// Upward reports (track ended, seek requested) go to `reports`. The task
/// returns the sync loop after teardown.
pub fn spawn_viewer<M: MediaHandle + 'static>(
    store: Arc<dyn StateStore>,
    room_id: impl Into<RoomId>,
    sync: SyncLoop<M>,
    reports: mpsc::Sender<ViewerReport>,
) -> (ViewerHandle, JoinHandle<SyncLoop<M>>) {
    let room_id = room_id.into();
    let (commands_tx, commands_rx) = mpsc::channel(32);
    let (view_tx, view_rx) = watch::channel(sync.view(&room_id, None, Utc::now()));
    let cancel = CancellationToken::new();

    let task = ViewerTask {
        room_id,
        store,
        sync,
        queue_position: None,
        reports,
        view_tx,
    };
    let join = tokio::spawn(task.run(commands_rx, cancel.clone()));

    let handle = ViewerHandle {
        commands: commands_tx,
        view: view_rx,
        cancel,
    };
    (handle, join)
}
