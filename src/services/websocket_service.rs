use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use super::player_service;
use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle for an individual player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerMessage>(state.config().outbound_buffer);
    let connection_id = Uuid::new_v4();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to serialize message `{message:?}`");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let user_id = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::AddUser(payload)) => {
                    match player_service::add_user(&state, payload, connection_id, outbound_tx.clone()) {
                        Ok(user_id) => user_id,
                        Err(err) => {
                            reply(&outbound_tx, ServerMessage::error(err.to_string()));
                            finalize(writer_task, outbound_tx).await;
                            return;
                        }
                    }
                }
                Ok(_) => {
                    warn!("first message was not add-user");
                    reply(&outbound_tx, ServerMessage::error("Send add-user first"));
                    finalize(writer_task, outbound_tx).await;
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "failed to parse player message");
                    reply(&outbound_tx, ServerMessage::error("Invalid message"));
                    finalize(writer_task, outbound_tx).await;
                    return;
                }
            }
        }
        Ok(Some(Ok(_))) | Ok(None) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    if let Err(err) = player_service::handle_message(&state, user_id, message).await {
                        warn!(%user_id, error = %err, "player message rejected");
                        reply(&outbound_tx, ServerMessage::error(err.to_string()));
                    }
                }
                Err(err) => {
                    warn!(%user_id, error = %err, "failed to parse player message");
                    reply(&outbound_tx, ServerMessage::error("Invalid message"));
                }
            },
            Ok(Message::Close(_)) => {
                info!(%user_id, "player closed the connection");
                break;
            }
            Ok(Message::Binary(_)) | Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%user_id, error = %err, "websocket error");
                break;
            }
        }
    }

    player_service::disconnect(&state, user_id, connection_id).await;
    finalize(writer_task, outbound_tx).await;
}

fn reply(tx: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if let Err(err) = tx.try_send(message) {
        warn!(error = %err, "failed to queue reply");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::Sender<ServerMessage>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
