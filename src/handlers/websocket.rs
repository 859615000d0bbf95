use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::constants::CLOSE_INTERNAL_ERROR;
use crate::core::message::{close_message, ServerFrame};
use crate::core::room::RoomDirectory;
use crate::core::room_key::RoomId;

// Handle a WebSocket connection for one room
pub async fn handle_ws_client(
    ws: WebSocket,
    rooms: RoomDirectory,
    room_id: RoomId,
    identity: String,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Spawn a task to forward messages from our channel to the WebSocket
    let writer = tokio::task::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = message.is_close();
            if let Err(e) = ws_tx.send(message).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let (room, session) = match rooms.connect(&room_id, tx.clone(), &identity).await {
        Ok(accepted) => accepted,
        Err(e) => {
            error!("Session setup failed in room {}: {}", room_id, e);
            let _ = tx.send(Message::text(ServerFrame::error(&e).to_json()));
            let _ = tx.send(close_message(
                CLOSE_INTERNAL_ERROR,
                "Uncaught exception during session setup",
            ));
            drop(tx);
            let _ = writer.await;
            return;
        }
    };
    drop(tx);
    info!("Client {} connected to room {}", identity, room_id);

    // Handle incoming messages
    let mut errored = false;
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(msg) => {
                if msg.is_close() {
                    break;
                }
                let text = match msg.to_str() {
                    Ok(text) => text.to_string(),
                    // binary, ping and pong frames carry no chat traffic
                    Err(_) => continue,
                };
                if let Err(e) = room.send_frame(session, text) {
                    warn!("Dropping connection from {}: {}", identity, e);
                    break;
                }
            }
            Err(e) => {
                debug!("WebSocket error from {}: {}", identity, e);
                room.report_error(session, e.to_string());
                errored = true;
                break;
            }
        }
    }

    if !errored {
        room.close_session(session);
    }
    // the limiter's error callback may still hold a sender
    writer.abort();
    info!("Client {} disconnected from room {}", identity, room_id);
}
