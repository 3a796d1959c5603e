//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::rooms::RoomRegistry;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub registry: Arc<RoomRegistry>,
}

/// Build the router
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/rooms", get(super::handlers::list_rooms))
        // Read model
        .route("/rooms/:room_id/state", get(super::handlers::get_state))
        .route("/rooms/:room_id/view", get(super::handlers::get_view))
        .route("/rooms/:room_id/queue", get(super::handlers::get_queue))
        .route("/rooms/:room_id/history", get(super::handlers::get_history))
        .route("/rooms/:room_id/quota", get(super::handlers::get_quota))
        // Intake and queue
        .route("/rooms/:room_id/requests", post(super::handlers::submit_request))
        .route("/rooms/:room_id/queue/:entry_id", delete(super::handlers::remove_entry))
        // Playback control
        .route("/rooms/:room_id/playback/play", post(super::handlers::play))
        .route("/rooms/:room_id/playback/pause", post(super::handlers::pause))
        .route("/rooms/:room_id/playback/stop", post(super::handlers::stop))
        .route("/rooms/:room_id/playback/skip", post(super::handlers::skip))
        .route("/rooms/:room_id/playback/seek", post(super::handlers::seek))
        .route("/rooms/:room_id/playback/track", post(super::handlers::set_track))
        .route("/rooms/:room_id/track-ended", post(super::handlers::track_ended))
        // Moderation
        .route(
            "/rooms/:room_id/suspensions/:submitter_id",
            post(super::handlers::suspend).delete(super::handlers::lift_suspension),
        )
        // SSE event stream
        .route("/rooms/:room_id/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run(
    port: u16,
    registry: Arc<RoomRegistry>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = router(AppContext { registry });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
