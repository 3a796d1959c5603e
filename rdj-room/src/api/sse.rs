//! Server-Sent Events stream of room change events

use crate::api::server::AppContext;
use crate::error::Result;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// GET /rooms/:room_id/events - SSE event stream for one room
///
/// Lagged clients receive a `Resync` event and should re-read the state.
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Path(room_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // Opening the room makes sure its scheduler is running
    let room = ctx.registry.room(&room_id).await?;
    debug!("New SSE client for {}", room.room_id());

    let rx = ctx.registry.store().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let room_id = room_id.clone();
        async move {
            match result {
                Ok(event) if event.is_for_room(&room_id) => match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                    Err(e) => {
                        warn!("Failed to serialize event: {}", e);
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => {
                    warn!("SSE stream for {} lagged: {:?}", room_id, e);
                    Some(Ok(Event::default().event("Resync").data("{}")))
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
