//! HTTP request handlers

use super::server::AppContext;
use super::Caller;
use crate::error::{Error, Result};
use crate::intake::{RawRequest, Submission};
use crate::rooms::ReportOutcome;
use crate::scheduler::AdvanceOutcome;
use crate::viewer::{RoomView, ViewerReport};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rdj_common::position::position_ms;
use rdj_common::{EntryId, HistoryEntry, PlaybackState, QueueEntry, RoomId, SubmitterQuota, Track, TrackId, Versioned};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 200;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomId>,
}

/// Authoritative state plus the position derived from it at response time
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub version: u64,
    pub state: PlaybackState,
    pub position_ms: u64,
    pub server_time: DateTime<Utc>,
}

impl From<Versioned<PlaybackState>> for StateResponse {
    fn from(stored: Versioned<PlaybackState>) -> Self {
        let now = Utc::now();
        Self {
            version: stored.version,
            position_ms: position_ms(&stored.record, now),
            state: stored.record,
            server_time: now,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub rank: usize,
    pub entry: QueueEntry,
    pub track: Option<Track>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub entries: Vec<QueueItem>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub quota: SubmitterQuota,
    pub cap: usize,
    pub queue_position: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub position_ms: u64,
}

/// Either replay a stored track or start one from a link
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SetTrackRequest {
    Stored {
        track_id: TrackId,
    },
    Link {
        reference: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
pub struct TrackEndedRequest {
    pub track_id: TrackId,
}

#[derive(Debug, Deserialize)]
pub struct SuspendRequest {
    pub until: DateTime<Utc>,
}

// ============================================================================
// Health & Rooms
// ============================================================================

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "rdj-room".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /rooms - rooms opened since startup
pub async fn list_rooms(State(ctx): State<AppContext>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: ctx.registry.open_rooms().await,
    })
}

// ============================================================================
// Read Model
// ============================================================================

/// GET /rooms/:room_id/state
pub async fn get_state(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.state().await?.into()))
}

/// GET /rooms/:room_id/view - read model for the calling viewer
pub async fn get_view(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<RoomView>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.view(&user).await?))
}

/// GET /rooms/:room_id/queue
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
) -> Result<Json<QueueResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    let store = ctx.registry.store();
    let queue = room.queue.list().await?;

    let mut entries = Vec::with_capacity(queue.len());
    for (index, entry) in queue.into_iter().enumerate() {
        let track = store.get_track(entry.track_id).await?;
        entries.push(QueueItem {
            rank: index + 1,
            entry,
            track,
        });
    }
    Ok(Json(QueueResponse { entries }))
}

/// GET /rooms/:room_id/history?limit=N
pub async fn get_history(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    Ok(Json(HistoryResponse {
        entries: room.history(limit).await?,
    }))
}

/// GET /rooms/:room_id/quota - the caller's own intake accounting
pub async fn get_quota(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<QuotaResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(QuotaResponse {
        quota: room.queue.quota(&user).await?,
        cap: room.queue.cap(),
        queue_position: room.queue.position_of(&user).await?,
    }))
}

// ============================================================================
// Intake & Queue
// ============================================================================

/// POST /rooms/:room_id/requests
pub async fn submit_request(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
    Json(request): Json<RawRequest>,
) -> Result<(StatusCode, Json<Submission>)> {
    let room = ctx.registry.room(&room_id).await?;
    let submission = room.intake.submit(request, &user).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// DELETE /rooms/:room_id/queue/:entry_id - withdraw (owner) or moderate
pub async fn remove_entry(
    State(ctx): State<AppContext>,
    Path((room_id, entry_id)): Path<(String, EntryId)>,
    Caller(user): Caller,
) -> Result<Json<QueueEntry>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.queue.remove(entry_id, &user).await?))
}

// ============================================================================
// Playback Control
// ============================================================================

/// POST /rooms/:room_id/playback/play
pub async fn play(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.control.play(&user).await?.into()))
}

/// POST /rooms/:room_id/playback/pause
pub async fn pause(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.control.pause(&user).await?.into()))
}

/// POST /rooms/:room_id/playback/stop
pub async fn stop(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.control.stop(&user).await?.into()))
}

/// POST /rooms/:room_id/playback/skip
pub async fn skip(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
) -> Result<Json<AdvanceOutcome>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.control.skip(&user).await?))
}

/// POST /rooms/:room_id/playback/seek
pub async fn seek(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
    Json(request): Json<SeekRequest>,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    Ok(Json(room.control.seek(&user, request.position_ms).await?.into()))
}

/// POST /rooms/:room_id/playback/track
pub async fn set_track(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
    Json(request): Json<SetTrackRequest>,
) -> Result<Json<StateResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    let stored = match request {
        SetTrackRequest::Stored { track_id } => room.control.replay(&user, track_id).await?,
        SetTrackRequest::Link {
            reference,
            title,
            duration_ms,
        } => {
            room.control
                .set_track_from_link(&user, &reference, title, duration_ms)
                .await?
        }
    };
    Ok(Json(stored.into()))
}

/// POST /rooms/:room_id/track-ended - the controller's player reached the end
pub async fn track_ended(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
    Caller(user): Caller,
    Json(request): Json<TrackEndedRequest>,
) -> Result<Json<AdvanceOutcome>> {
    let room = ctx.registry.room(&room_id).await?;
    let report = ViewerReport::TrackEnded {
        track_id: request.track_id,
    };
    match room.report(&user, report).await? {
        ReportOutcome::Advanced(outcome) => Ok(Json(outcome)),
        ReportOutcome::Seeked(_) => Err(Error::Internal(
            "track-ended report produced a seek".to_string(),
        )),
    }
}

// ============================================================================
// Moderation
// ============================================================================

/// POST /rooms/:room_id/suspensions/:submitter_id
pub async fn suspend(
    State(ctx): State<AppContext>,
    Path((room_id, submitter_id)): Path<(String, String)>,
    Caller(user): Caller,
    Json(request): Json<SuspendRequest>,
) -> Result<Json<StatusResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    room.queue.suspend(&user, &submitter_id, request.until).await?;
    Ok(Json(StatusResponse {
        status: "suspended".to_string(),
    }))
}

/// DELETE /rooms/:room_id/suspensions/:submitter_id
pub async fn lift_suspension(
    State(ctx): State<AppContext>,
    Path((room_id, submitter_id)): Path<(String, String)>,
    Caller(user): Caller,
) -> Result<Json<StatusResponse>> {
    let room = ctx.registry.room(&room_id).await?;
    room.queue.lift_suspension(&user, &submitter_id).await?;
    Ok(Json(StatusResponse {
        status: "lifted".to_string(),
    }))
}
