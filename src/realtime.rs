//! Realtime fan-out of control-plane state changes.
//!
//! Every mutation is broadcast to all subscribed WebSocket clients. A slow
//! or disconnected subscriber only loses its own frames; delivery to the
//! rest is unaffected (broadcast channel semantics).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::EventPayload;
use crate::server::AppState;

#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<EventPayload>>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel::<EventPayload>(512);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Broadcast a typed event to all connected clients.
    pub fn broadcast(&self, event: EventPayload) {
        if let Err(e) = self.sender.send(event) {
            // No subscribers connected; nothing to deliver.
            debug!("broadcast with no subscribers: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventPayload> {
        self.sender.subscribe()
    }
}

/// WebSocket endpoint handler. On connect the client receives a snapshot of
/// the full agent list and issue-binding history, then typed events as they
/// occur.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, state))
}

async fn client_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let agents = state.registry.list().await;
    let issues = state.issues.snapshot().await;
    let snapshot = EventPayload::snapshot(agents, issues);
    if sink.send(Message::Text(snapshot.to_frame())).await.is_err() {
        return;
    }

    let mut receiver = state.broadcaster.subscribe();
    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(payload) => {
                    if sink.send(Message::Text(payload.to_frame())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("websocket client lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                // Commands arrive over the HTTP API; inbound frames are ignored.
                Some(Ok(_)) => {}
            },
        }
    }
}
