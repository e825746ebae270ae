use std::sync::Arc;
use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use tokio::sync::mpsc;
use tracing::{info, warn, error, debug};
use futures_util::{StreamExt, SinkExt};
use uuid::Uuid;

use crate::AppState;
use crate::error::ProtocolViolation;
use crate::models::{ConnectedMessage, Envelope, Event};
use crate::utils::scope_guard::ScopeGuard;
use crate::websocket::msg_code_change_handler::handle_code_change_message;
use crate::websocket::msg_join_handler::handle_join_message;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::websocket::msg_sync_code_handler::handle_sync_code_message;
use crate::ws::registry::PeerSender;

/// WebSocket handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    debug!("New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {

    // Generate unique connection ID to identify this client
    let connection_id = Uuid::new_v4().to_string();
    info!("WebSocket connection established with connection_id: {}", connection_id);

    let (mut sender, mut receiver) = socket.split();

    // All frames for this client go through one queue so that relay fan-out
    // and direct replies keep their order.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Whatever ends this connection, make sure the room hears about it
    let _leave_guard = {
        let registry = app_state.registry.clone();
        let connection_id = connection_id.clone();
        ScopeGuard::new(move || {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        registry.leave(&connection_id).await;
                    });
                }
                Err(_) => warn!("No runtime to clean up connection {}", connection_id),
            }
        })
    };

    match Envelope::encode(Event::Connected, &ConnectedMessage { connection_id: connection_id.clone() }) {
        Ok(hello) => {
            let _ = tx.send(hello);
        }
        Err(e) => {
            error!("Failed to encode handshake for {}: {}", connection_id, e);
            return;
        }
    }

    // Forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Listen to the websocket for incoming messages
    let recv_connection_id = connection_id.clone();
    let registry_state = app_state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(violation) = handle_frame(&text, &recv_connection_id, &tx, &registry_state).await {
                        warn!("Skipping frame from {}: {}", recv_connection_id, violation);
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket error from {}: {}", recv_connection_id, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
    info!("WebSocket connection {} terminated", connection_id);
}

/// Decode one text frame and hand it to the matching message handler.
async fn handle_frame(
    text: &str,
    connection_id: &str,
    tx: &PeerSender,
    app_state: &AppState,
) -> Result<(), ProtocolViolation> {
    let envelope = Envelope::parse(text)?;
    debug!("Received {} from {}", envelope.event, connection_id);

    match envelope.event {
        Event::Join => handle_join_message(&envelope.payload_as()?, connection_id, tx, &app_state.registry).await,
        Event::CodeChange => handle_code_change_message(&envelope.payload_as()?, connection_id, &app_state.registry).await,
        Event::SyncCode => handle_sync_code_message(&envelope.payload_as()?, connection_id, &app_state.registry).await,
        Event::Ping => handle_ping_message(connection_id, tx),
        other => Err(ProtocolViolation::Unexpected(other)),
    }
}
