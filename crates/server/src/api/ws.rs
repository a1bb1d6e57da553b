//! WebSocket stream of batch events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use relister_core::BatchEvent;

use super::handlers::error_response;
use crate::metrics::{
    BATCH_EVENTS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT,
};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(orchestrator) = state.orchestrator() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "no browser bridge is configured",
        )
        .into_response();
    };
    let rx = orchestrator.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx))
}

/// Serialize an event as the JSON text frame sent to clients.
pub fn encode_event(event: &BatchEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, mut rx: broadcast::Receiver<BatchEvent>) {
    let (mut sender, mut receiver) = socket.split();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    // Forward batch events to this client
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let event_type = event.event_type();
                    BATCH_EVENTS.with_label_values(&[event_type]).inc();

                    match encode_event(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                            WS_MESSAGES_SENT.with_label_values(&[event_type]).inc();
                        }
                        Err(e) => {
                            error!("Failed to serialize batch event: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Events are at-most-once; the next progress snapshot catches the client up
                    warn!("WebSocket client lagged, skipped {} events", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed");
                    break;
                }
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close)
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use relister_core::{JobResult, ProgressSnapshot, ResultStatus};

    #[test]
    fn test_encode_progress_event() {
        let mut snapshot = ProgressSnapshot::new("batch-1", 3);
        snapshot.record(ResultStatus::Success);

        let json = encode_event(&BatchEvent::Progress(snapshot)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["current"], 1);
        assert_eq!(value["total"], 3);
    }

    #[test]
    fn test_encode_result_event_omits_missing_url() {
        let event = BatchEvent::Result(JobResult {
            batch_id: "batch-1".to_string(),
            job_id: "job-1".to_string(),
            index: 0,
            link: "https://source.example/item/1".to_string(),
            status: ResultStatus::Error,
            message: "scrape failed: empty page".to_string(),
            destination_url: None,
        });

        let json = encode_event(&event).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["status"], "error");
        assert_eq!(value["jobId"], "job-1");
        assert!(value.get("destinationUrl").is_none());
    }
}
