//! Server-Sent Events (SSE) for matching progress streaming

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Interval of heartbeat comments
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// GET /matching/events - SSE event stream for matching progress
///
/// Opens with a `DispatchStatus` event carrying the current aggregate
/// status, then streams every `TawoEvent`:
/// - DatasetUploaded
/// - DispatchStarted / RowSettled / DispatchCompleted / DispatchFailed
/// - SelectionChanged
/// - MatchingReset
pub async fn matching_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to matching events");

    let mut rx = state.event_bus.subscribe();
    let initial_status = state.matching.status();

    let stream = async_stream::stream! {
        match serde_json::to_string(&initial_status) {
            Ok(status_json) => yield Ok(Event::default().event("DispatchStatus").data(status_json)),
            Err(e) => warn!("SSE: Failed to serialize status: {}", e),
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => match received {
                    Ok(event) => {
                        let event_type = event.event_type();
                        match serde_json::to_string(&event) {
                            Ok(event_json) => {
                                debug!("SSE: Broadcasting matching event: {}", event_type);
                                yield Ok(Event::default().event(event_type).data(event_json));
                            }
                            Err(e) => {
                                warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "SSE: Client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("SSE: Event bus closed, ending stream");
                        break;
                    }
                },
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}
