use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sealchat_core::{ChatError, ConnectionId, Directory, Outcome, RelayService, ServerEvent};

use crate::{hub::Hub, metrics::RelayMetrics};

#[derive(Clone)]
pub struct AppState {
    pub service: RelayService<Hub>,
    pub directory: Arc<Directory>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<RelayMetrics>,
    pub max_frame_bytes: usize,
    pub shutdown: watch::Receiver<bool>,
}

// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if *state.shutdown.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    ws.max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection, mut outbound) = state.hub.attach();
    let (mut sink, mut stream) = socket.split();
    info!(connection = %connection, "client connected");

    // Writer: drains the outbound queue until the hub drops the sender.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(connection = %connection, error = %e, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(connection = %connection, error = %e, "socket error");
                        break;
                    }
                    None => break,
                };

                match frame {
                    Message::Text(text) => {
                        let dispatch = state.service.handle_frame(connection, &text).await;
                        state.metrics.record(dispatch.outcome);
                        if let Some(event) = dispatch.reply {
                            reply(&state.hub, connection, event);
                        }
                    }
                    Message::Binary(_) => {
                        state.metrics.record(Outcome::Malformed);
                        let err = ChatError::InvalidEncoding("binary frame".to_string());
                        reply(&state.hub, connection, ServerEvent::error(&err));
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    state.service.on_disconnect(connection).await;
    state.hub.detach(connection);
    let _ = writer.await;
    info!(connection = %connection, "client disconnected");
}

/// Queue a direct reply for `connection`. Returns false if it was dropped.
fn reply(hub: &Hub, connection: ConnectionId, event: ServerEvent) -> bool {
    match hub.send(connection, event) {
        Ok(()) => true,
        Err(e) => {
            warn!(connection = %connection, error = %e, "reply dropped");
            false
        }
    }
}

// GET /health
pub async fn get_health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.hub.len(),
        "users": state.directory.len(),
    }))
    .into_response()
}

// GET /metrics
pub async fn get_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.export_prometheus() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            warn!(error = %e, "metrics export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_reports_dropped_event() {
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let hub = Hub::new(1, Arc::clone(&metrics));
        let (connection, mut outbound) = hub.attach();
        let err = ChatError::InvalidEncoding("binary frame".to_string());

        assert!(reply(&hub, connection, ServerEvent::error(&err)));
        // Queue of one is now full.
        assert!(!reply(&hub, connection, ServerEvent::error(&err)));
        assert_eq!(metrics.outbound_dropped.get(), 1.0);

        hub.detach(connection);
        assert!(!reply(&hub, connection, ServerEvent::error(&err)));
        assert_eq!(
            outbound.try_recv().unwrap(),
            ServerEvent::Error { reason: "InvalidEncoding".into() }
        );
    }
}
