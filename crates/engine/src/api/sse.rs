//! SSE transport for the subscription bridge.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use uuid::Uuid;

use genstream_domain::{ObserverEvent, TaskId};
use genstream_shared::SseFrame;

use crate::app::App;

/// `GET /api/tasks/gemini/{task_id}/sse`
///
/// One SSE event per observer event, in bridge order. The response ends
/// after the terminal event; a client disconnect drops the bridge.
pub async fn stream_task(
    State(app): State<Arc<App>>,
    Path(task_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let task_id = TaskId::from_uuid(task_id);
    tracing::debug!(task_id = %task_id, "Opening task event stream");

    let events = app
        .use_cases
        .stream
        .execute(task_id, app.shutdown.clone())
        .map(|event| Ok(to_sse_event(&event)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &ObserverEvent) -> Event {
    let frame = SseFrame::from(event);
    Event::default().event(frame.event).data(frame.data_string())
}
