//! Room registry
//!
//! A room bundles the queue manager, scheduler, intake and control surface
//! that share one playback state. Rooms are opened on first use; each gets
//! its own scheduler task, all of which stop when the registry shuts down.

use crate::auth::{Authorizer, Capability};
use crate::config::ServiceConfig;
use crate::control::ControlSurface;
use crate::error::{Error, Result};
use crate::intake::{MetadataResolver, RequestIntake};
use crate::queue::QueueManager;
use crate::scheduler::{AdvanceGuard, AdvanceOutcome, AutoDj, Scheduler, SchedulerHandle};
use crate::store::{RetryPolicy, StateStore};
use crate::viewer::{derive_view, RoomView, ViewerReport};
use chrono::Utc;
use rdj_common::{HistoryEntry, PlaybackState, RoomId, Versioned};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_ROOM_ID_LEN: usize = 64;

/// Outcome of a viewer report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Advanced(AdvanceOutcome),
    Seeked(Versioned<PlaybackState>),
}

/// All services for one room
pub struct Room {
    room_id: RoomId,
    store: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
    pub queue: Arc<QueueManager>,
    pub dj: Arc<AutoDj>,
    pub scheduler: SchedulerHandle,
    pub intake: RequestIntake,
    pub control: ControlSurface,
}

impl Room {
    /// Build a room and spawn its scheduler
    pub fn open(
        room_id: &str,
        store: Arc<dyn StateStore>,
        authorizer: Arc<dyn Authorizer>,
        resolver: Arc<dyn MetadataResolver>,
        config: &ServiceConfig,
        cancel: CancellationToken,
    ) -> (Arc<Room>, JoinHandle<()>) {
        let retry = RetryPolicy::from_config(&config.store);
        let guard = Arc::new(AdvanceGuard::new(config.scheduler.guard_timeout()));
        let dj = Arc::new(AutoDj::new(
            room_id,
            Arc::clone(&store),
            Arc::clone(&guard),
            config.scheduler.clone(),
            retry,
        ));
        let queue = Arc::new(QueueManager::new(
            room_id,
            Arc::clone(&store),
            Arc::clone(&authorizer),
            &config.queue,
            retry,
        ));

        let (scheduler, handle) = Scheduler::new(Arc::clone(&dj), store.subscribe(), config.scheduler.clone());
        let task = tokio::spawn(scheduler.run(cancel));

        let intake = RequestIntake::new(
            room_id,
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&dj),
            handle.clone(),
            resolver,
            config.intake.clone(),
            retry,
        );
        let control = ControlSurface::new(
            room_id,
            Arc::clone(&store),
            Arc::clone(&authorizer),
            guard,
            handle.clone(),
            config.scheduler.clone(),
            retry,
        );

        let room = Arc::new(Room {
            room_id: room_id.to_string(),
            store,
            authorizer,
            queue,
            dj,
            scheduler: handle,
            intake,
            control,
        });
        (room, task)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn state(&self) -> Result<Versioned<PlaybackState>> {
        self.store.load_state(&self.room_id).await
    }

    pub async fn view(&self, viewer_id: &str) -> Result<RoomView> {
        derive_view(self.store.as_ref(), &self.room_id, viewer_id, Utc::now()).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.store.recent_history(&self.room_id, limit).await
    }

    /// Act on an upward viewer report
    ///
    /// Only the room controller's reports move the shared timeline.
    pub async fn report(&self, user_id: &str, report: ViewerReport) -> Result<ReportOutcome> {
        self.authorizer
            .require(&self.room_id, user_id, Capability::RoomController)
            .await?;
        match report {
            ViewerReport::TrackEnded { track_id } => {
                let outcome = self.scheduler.track_ended(track_id).await?;
                Ok(ReportOutcome::Advanced(outcome))
            }
            ViewerReport::SeekRequested { position_ms } => {
                let stored = self.control.seek(user_id, position_ms).await?;
                Ok(ReportOutcome::Seeked(stored))
            }
        }
    }
}

/// Lazily opened rooms sharing one store
pub struct RoomRegistry {
    store: Arc<dyn StateStore>,
    authorizer: Arc<dyn Authorizer>,
    resolver: Arc<dyn MetadataResolver>,
    config: ServiceConfig,
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl RoomRegistry {
    pub fn new(
        store: Arc<dyn StateStore>,
        authorizer: Arc<dyn Authorizer>,
        resolver: Arc<dyn MetadataResolver>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            authorizer,
            resolver,
            config,
            rooms: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Open `room_id`, starting its scheduler on first use
    pub async fn room(&self, room_id: &str) -> Result<Arc<Room>> {
        validate_room_id(room_id)?;
        if self.cancel.is_cancelled() {
            return Err(Error::InvalidState("service is shutting down".to_string()));
        }
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Ok(Arc::clone(room));
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return Ok(Arc::clone(room));
        }
        let (room, task) = Room::open(
            room_id,
            Arc::clone(&self.store),
            Arc::clone(&self.authorizer),
            Arc::clone(&self.resolver),
            &self.config,
            self.cancel.child_token(),
        );
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        self.tasks.lock().await.push(task);
        info!("Opened room {}", room_id);
        Ok(room)
    }

    pub async fn open_rooms(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every scheduler and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("All room schedulers stopped");
    }
}

fn validate_room_id(room_id: &str) -> Result<()> {
    if room_id.is_empty() || room_id.len() > MAX_ROOM_ID_LEN {
        return Err(Error::Validation(format!(
            "room id must be 1-{} characters",
            MAX_ROOM_ID_LEN
        )));
    }
    if !room_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "room id '{}' may only contain letters, digits, '-' and '_'",
            room_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_validation() {
        assert!(validate_room_id("lobby-1_a").is_ok());
        assert!(validate_room_id("").is_err());
        assert!(validate_room_id("has space").is_err());
        assert!(validate_room_id(&"x".repeat(65)).is_err());
    }
}
