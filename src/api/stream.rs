//! Incremental Hunt Stream
//!
//! SSE endpoint for the ordered hunt event sequence. The hunt runs in its
//! own task; events flow through a bounded channel into the response
//! stream. Dropping the stream (client disconnect) drops the cancel
//! guard, which aborts every outstanding agent call for that hunt and no
//! other.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::api::state::AppState;
use crate::api::types::HuntStreamQuery;
use crate::hunt::HuntEvent;

const EVENT_BUFFER: usize = 64;

/// Cancels the hunt when the SSE stream is dropped
struct CancelGuard {
    cancel: broadcast::Sender<()>,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        // Harmless after a completed hunt; decisive on client disconnect
        let _ = self.cancel.send(());
    }
}

/// GET /api/hunt/stream?topic=…
pub async fn hunt_stream(
    State(state): State<AppState>,
    Query(query): Query<HuntStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<HuntEvent>(EVENT_BUFFER);
    let (cancel, _) = broadcast::channel(1);

    let coordinator = state.coordinator.clone();
    let hunt_cancel = cancel.clone();
    tokio::spawn(async move {
        coordinator
            .run_hunt_streaming(&query.topic, tx, hunt_cancel)
            .await;
    });

    let guard = CancelGuard { cancel };
    let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        let frame = Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|e| {
                debug!("unserializable hunt event: {e}");
                Event::default().event("error").data("serialization failed")
            });
        Some((Ok(frame), (rx, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
