use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tracing::debug;

use crate::logstream::SinkFrame;

use super::api::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One hub subscription per connection: an init frame with the buffered
/// logs, then each published event as a `log` frame. When the send side
/// fails the subscription drops and the hub reaps the sink on its next
/// broadcast.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (sink_id, mut frames) = state.hub.subscribe();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let message = match frame {
                    SinkFrame::Init(logs) => json!({
                        "type": "init",
                        "count": logs.len(),
                        "logs": logs,
                    }),
                    SinkFrame::Event(log) => json!({
                        "type": "log",
                        "log": log,
                    }),
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        debug!(error = %e, "Failed to serialize WS frame");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Clients only listen; ignore anything they say.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(sink_id);
    let _ = sender.send(Message::Close(None)).await;
}
