use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::party::{ClientMessage, PartyServer, SignalingHandler};

pub async fn handle_party_websocket(websocket: WebSocket, server: PartyServer) {
    tracing::info!("New party WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let handler = SignalingHandler::new(server, tx);
    let connection_id = handler.connection_id().to_string();

    // Spawn task to push engine broadcasts out to the client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => handle_websocket_message(&handler, message),
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    handler.cleanup();
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Party WebSocket connection closed");
}

fn handle_websocket_message(handler: &SignalingHandler, message: Message) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(connection_id = %handler.connection_id(), "Received party message: {}", text);

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(client_message) => {
                handler.handle_message(client_message);
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_message = %text,
                    "Failed to parse party message"
                );
            }
        }
    }
}
