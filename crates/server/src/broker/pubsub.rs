//! `/pubsub` websocket endpoint.
//!
//! Frames from one socket are handled strictly in arrival order, so a client
//! that sees the pong for a ping knows every earlier frame has been applied.

use super::state::BrokerState;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tessera_core::Frame;
use uuid::Uuid;

/// GET /pubsub
pub async fn pubsub(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: BrokerState) {
    let (id, mut outbound) = state.connect();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(connection = %id, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = socket.send(Message::Text(text.into())).await {
                    tracing::debug!(connection = %id, error = %e, "Pub/sub send failed");
                    break;
                }
            }
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => handle_frame(&state, id, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by the websocket layer.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Pub/sub receive failed");
                    break;
                }
            },
        }
    }

    state.disconnect(id);
}

fn handle_frame(state: &BrokerState, id: Uuid, text: &str) {
    match Frame::from_json(text) {
        Ok(Frame::Subscribe { topics }) => state.subscribe(id, topics),
        Ok(Frame::Unsubscribe { topics }) => state.unsubscribe(id, &topics),
        Ok(Frame::Publish { topic, data }) => {
            state.publish(&topic, data);
        }
        Ok(Frame::Event { topic, .. }) => {
            tracing::warn!(connection = %id, %topic, "Ignoring event frame sent by a client");
        }
        Err(e) => tracing::warn!(connection = %id, error = %e, "Malformed pub/sub frame"),
    }
}
