//! Server-sent progress stream

use crate::api::state::AppState;
use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::StreamExt;
use std::convert::Infallible;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;

/// GET /progress - Server-sent events stream of the progress log
///
/// Each connection starts from the first event and keeps its own read offset, so a reload
/// replays the whole log. Every event is sent as a JSON `data:` line.
pub async fn progress(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let sink = state.session.progress().clone();
    let mut interval = tokio::time::interval(state.session.config().web.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut offset = 0;
    let stream = IntervalStream::new(interval).flat_map(move |_| {
        let (events, next) = sink.drain_since(offset);
        offset = next;

        let frames: Vec<Result<SseEvent, Infallible>> = events
            .iter()
            .filter_map(|event| match serde_json::to_string(event) {
                Ok(json_data) => Some(Ok(SseEvent::default().data(json_data))),
                Err(e) => {
                    tracing::warn!("Failed to serialize progress event to JSON: {}", e);
                    None
                }
            })
            .collect();
        futures::stream::iter(frames)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
