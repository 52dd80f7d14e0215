//! The SSE endpoint.
//!
//! Drains a run's stream buffer into `event: <type>` / `data: <json>`
//! frames. Heartbeats come from the buffer consumer and are written as SSE
//! comments (`: ping`), keeping the TCP connection warm without inventing
//! events. The connection closes after `complete` or `error`.

use std::convert::Infallible;

use axum::Router;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::routing::get;
use futures::Stream;
use serde_json::{Value, json};

use artifactflow_engine::{Event, StreamItem};

use crate::error::ApiError;
use crate::extract::CurrentUser;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new().route("/{run_id}", get(stream_events))
}

/// GET /api/v1/stream/{run_id}
async fn stream_events(
    State(state): State<SharedState>,
    CurrentUser(_user): CurrentUser,
    Path(run_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let consumer = state
        .streams
        .consume(&run_id, state.config.sse_ping_interval)?;

    let stream = futures::stream::unfold(consumer, |mut consumer| async move {
        match consumer.next().await {
            Some(StreamItem::Event(event)) => {
                let frame = SseEvent::default()
                    .event(event.event_type.as_str())
                    .data(wire_payload(&event).to_string());
                Some((Ok(frame), consumer))
            }
            Some(StreamItem::Heartbeat) => {
                Some((Ok(SseEvent::default().comment("ping")), consumer))
            }
            None => None,
        }
    });

    Ok(Sse::new(stream))
}

/// Flatten the envelope into the wire payload: the event's `data` object
/// plus `agent`/`tool` fields and the timestamp.
fn wire_payload(event: &Event) -> Value {
    let mut payload = match event.data {
        Some(Value::Object(ref map)) => Value::Object(map.clone()),
        Some(ref other) => json!({ "data": other }),
        None => json!({}),
    };

    if let Some(ref agent) = event.agent {
        payload["agent"] = json!(agent);
    }
    if let Some(ref tool) = event.tool {
        payload["tool"] = json!(tool);
    }
    payload["timestamp"] = json!(event.timestamp.to_rfc3339());
    payload
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
