//! WebSocket handler for real-time updates

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use scene_engine::EngineEvent;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// Messages sent to clients
#[derive(Serialize)]
#[serde(untagged)]
pub enum WsMessage<'a> {
    Hello(Hello),
    Event(&'a EngineEvent),
}

#[derive(Serialize)]
pub struct Hello {
    #[serde(rename = "type")]
    kind: &'static str,
    simulated: bool,
    kill_switch_active: bool,
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx = state.engine.subscribe();

    let hello = WsMessage::Hello(Hello {
        kind: "connected",
        simulated: state.engine.is_simulated(),
        kill_switch_active: !state.engine.mutation_allowed().await.unwrap_or(true),
    });
    let Ok(hello) = serde_json::to_string(&hello) else {
        return;
    };
    if sender.send(Message::Text(hello)).await.is_err() {
        return;
    }

    // Forward engine events until the client goes away
    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let json = match serde_json::to_string(&WsMessage::Event(&event)) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!("Failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("WebSocket client lagged, {} events dropped", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
