use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures_util::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::info;

use super::routes::AppState;

/// Server-sent events: `connected`, then heartbeats and `data_changed`.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(subscribers = state.notifier.subscriber_count() + 1, "📡 Event stream opened");
    let stream = state.notifier.subscribe().map(|event| {
        // Serialized on one line, so the frame is a single `data:` field
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });
    Sse::new(stream)
}
