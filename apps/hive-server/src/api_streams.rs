//! The durable stream endpoint.
//!
//! `GET /streams/{project}?offset=N&limit=M` reads committed frames by
//! offset; `GET /streams/{project}?live=true[&offset=N]` tails new events
//! over SSE. Offsets are journal sequences, so a reader that reconnects at
//! its last offset sees no gap and no duplicate. The live tail rides the
//! in-process bus for latency but drains through the journal by offset, and
//! a polling tick backstops both; batches are capped at 100.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use hive_kernel::{EventFilter, Kernel};

use crate::app_state::AppState;
use crate::error_response;

const BATCH_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub(crate) struct StreamQuery {
    offset: Option<String>,
    limit: Option<i64>,
    #[serde(default)]
    live: Option<bool>,
}

/// One wire frame: `offset` equals the event's sequence.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct StreamFrame {
    pub offset: i64,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

fn frame(event: &hive_kernel::Event) -> StreamFrame {
    StreamFrame {
        offset: event.sequence,
        data: serde_json::to_value(event).unwrap_or_else(|_| serde_json::json!({})),
        timestamp: event.timestamp_ms,
    }
}

fn parse_offset(raw: Option<&str>) -> Result<Option<i64>, Response> {
    match raw {
        None => Ok(None),
        Some(s) => match s.parse::<i64>() {
            Ok(v) if v >= 0 => Ok(Some(v)),
            _ => Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": {"kind": "Invalid", "message": format!("malformed offset `{s}`")}
                })),
            )
                .into_response()),
        },
    }
}

pub(crate) async fn stream_events(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let offset = match parse_offset(query.offset.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if query.live.unwrap_or(false) {
        return live_tail(&state, project, offset).await;
    }

    let limit = query.limit.unwrap_or(BATCH_LIMIT).clamp(1, 1000);
    let filter = EventFilter {
        project_key: Some(project),
        after_sequence: Some(offset.unwrap_or(0)),
        limit: Some(limit),
        ..Default::default()
    };
    match state.kernel().read_events(&filter) {
        Ok(events) => {
            let frames: Vec<StreamFrame> = events.iter().map(frame).collect();
            Json(frames).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn live_tail(state: &AppState, project: String, offset: Option<i64>) -> Response {
    // With no offset the tail starts at the current head: history is not
    // replayed on live connections.
    let start = match offset {
        Some(v) => v,
        None => match state.kernel().latest_sequence(Some(&project)) {
            Ok(head) => head,
            Err(err) => return error_response(err),
        },
    };

    let rx = spawn_poller(
        state.kernel().clone(),
        project,
        start,
        state.poll_interval(),
        state.shutdown(),
    );

    // Flush headers right away with a comment frame, then stream data.
    let connected = stream::once(async {
        Ok::<SseEvent, std::convert::Infallible>(SseEvent::default().comment("connected"))
    });
    let frames = ReceiverStream::new(rx).map(|f| {
        let data = serde_json::to_string(&f).unwrap_or_else(|_| "{}".to_string());
        Ok::<SseEvent, std::convert::Infallible>(
            SseEvent::default().id(f.offset.to_string()).data(data),
        )
    });
    Sse::new(connected.chain(frames))
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Start the per-subscriber polling loop.
///
/// Reads events after `last` in batches of at most [`BATCH_LIMIT`],
/// forwards each frame, and advances. Wakes early when the bus mirrors a
/// commit for this project. Exits when the client hangs up (send fails) or
/// the server shuts down.
pub(crate) fn spawn_poller(
    kernel: Kernel,
    project: String,
    mut last: i64,
    poll_interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::Receiver<StreamFrame> {
    let (tx, rx) = mpsc::channel::<StreamFrame>(128);
    tokio::spawn(async move {
        let mut bus_rx = kernel.bus().subscribe();
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let drain = tokio::select! {
                _ = interval.tick() => true,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    false
                }
                received = bus_rx.recv() => match received {
                    Ok(event) => event.project_key == project && event.sequence > last,
                    // Lagged subscribers catch up from the journal on the
                    // next tick.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => true,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            };
            if !drain {
                continue;
            }
            loop {
                let filter = EventFilter {
                    project_key: Some(project.clone()),
                    after_sequence: Some(last),
                    limit: Some(BATCH_LIMIT),
                    ..Default::default()
                };
                let events = match kernel.read_events(&filter) {
                    Ok(events) => events,
                    Err(err) => {
                        tracing::warn!(error = %err, "stream poll failed");
                        break;
                    }
                };
                if events.is_empty() {
                    break;
                }
                let full_batch = events.len() as i64 == BATCH_LIMIT;
                for event in &events {
                    last = event.sequence;
                    if tx.send(frame(event)).await.is_err() {
                        // Client went away; stop polling for it.
                        return;
                    }
                }
                if !full_batch {
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use hive_kernel::EventPayload;

    fn checkpoint(name: &str) -> EventPayload {
        EventPayload::CheckpointCreated {
            name: name.into(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn offset_read_returns_frames_in_order() {
        let (state, _shutdown) = test_state();
        for i in 0..5 {
            state
                .kernel()
                .append_event("p", checkpoint(&format!("cp-{i}")))
                .unwrap();
        }

        let response = stream_events(
            State(state.clone()),
            Path("p".into()),
            Query(StreamQuery {
                offset: Some("2".into()),
                limit: None,
                live: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let frames: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        let offsets: Vec<i64> = frames.iter().map(|f| f["offset"].as_i64().unwrap()).collect();
        assert_eq!(offsets, vec![3, 4, 5]);
        assert!(frames[0]["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(frames[0]["data"]["sequence"].as_i64().unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_offset_is_rejected() {
        let (state, _shutdown) = test_state();
        let response = stream_events(
            State(state),
            Path("p".into()),
            Query(StreamQuery {
                offset: Some("not-a-number".into()),
                limit: None,
                live: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn frames_filter_by_project() {
        let (state, _shutdown) = test_state();
        state.kernel().append_event("p", checkpoint("mine")).unwrap();
        state.kernel().append_event("q", checkpoint("theirs")).unwrap();

        let response = stream_events(
            State(state),
            Path("p".into()),
            Query(StreamQuery {
                offset: None,
                limit: None,
                live: None,
            }),
        )
        .await;
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let frames: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["project_key"], "p");
    }

    #[tokio::test]
    async fn poller_resumes_at_offset_without_gap_or_duplicate() {
        let (state, shutdown_tx) = test_state();
        let kernel = state.kernel().clone();
        for i in 0..3 {
            kernel.append_event("p", checkpoint(&format!("seed-{i}"))).unwrap();
        }
        let head = kernel.latest_sequence(Some("p")).unwrap();

        let mut rx = spawn_poller(
            kernel.clone(),
            "p".into(),
            head,
            std::time::Duration::from_millis(10),
            state.shutdown(),
        );

        kernel.append_event("p", checkpoint("fresh")).unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.offset, head + 1);

        // Reconnecting at the same offset yields exactly the same frame.
        drop(rx);
        let mut rx2 = spawn_poller(
            kernel.clone(),
            "p".into(),
            head,
            std::time::Duration::from_millis(10),
            state.shutdown(),
        );
        let frame2 = tokio::time::timeout(std::time::Duration::from_secs(2), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame2.offset, head + 1);
        assert_eq!(
            serde_json::to_string(&frame.data).unwrap(),
            serde_json::to_string(&frame2.data).unwrap()
        );

        // No second frame is pending.
        let extra =
            tokio::time::timeout(std::time::Duration::from_millis(100), rx2.recv()).await;
        assert!(extra.is_err());

        let _ = shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn poller_stops_on_server_shutdown() {
        let (state, shutdown_tx) = test_state();
        let rx = spawn_poller(
            state.kernel().clone(),
            "p".into(),
            0,
            std::time::Duration::from_millis(10),
            state.shutdown(),
        );
        shutdown_tx.send(true).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // The poll task dropped its sender.
        let mut rx = rx;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn live_tail_flushes_a_connected_comment() {
        let (state, _shutdown) = test_state();
        let response = stream_events(
            State(state),
            Path("p".into()),
            Query(StreamQuery {
                offset: None,
                limit: None,
                live: Some(true),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));
    }
}
