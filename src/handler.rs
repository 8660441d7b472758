//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake,
//! message parsing, and bidirectional communication with the ChatServer.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::ServerCommand;
use crate::types::ClientId;

/// Outbound messages buffered per connection before new ones are dropped
const OUTBOUND_BUFFER: usize = 64;

/// Serve one socket until either side goes away, then report the disconnect
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = ClientId::new();
    info!("Client {} connected from {}", client_id, peer_addr);

    // the actor never waits on this buffer
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    // Parse errors are answered directly from the read task
    let msg_tx_read = msg_tx.clone();

    if cmd_tx
        .send(ServerCommand::Connect {
            client_id,
            sender: msg_tx,
        })
        .await
        .is_err()
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let connected_msg = ServerMessage::Connected {
        client_id: client_id.to_string(),
    };
    let json = serde_json::to_string(&connected_msg)?;
    ws_sender.send(Message::Text(json.into())).await?;

    let cmd_tx_read = cmd_tx.clone();

    // socket -> actor
    let read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => {
                            let cmd = client_message_to_command(client_id, client_msg);
                            if cmd_tx_read.send(cmd).await.is_err() {
                                debug!("Server closed, ending read task for {}", client_id);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Invalid JSON from {}: {}", client_id, e);
                            let _ = msg_tx_read.send(AppError::Json(e).into()).await;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Client {} sent close frame", client_id);
                    break;
                }
                // tungstenite answers pings on its own; binary frames carry no requests
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error for {}: {}", client_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", client_id);
    });

    // actor -> socket
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for {}", client_id);
        let _ = ws_sender.close().await;
    });

    tokio::select! {
        _ = read_task => {
            debug!("Read task completed for {}", client_id);
        }
        _ = write_task => {
            debug!("Write task completed for {}", client_id);
        }
    }

    let _ = cmd_tx
        .send(ServerCommand::Disconnect { client_id })
        .await;

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Attach the connection id to a parsed client request
pub fn client_message_to_command(client_id: ClientId, msg: ClientMessage) -> ServerCommand {
    match msg {
        ClientMessage::SetUsername { username } => ServerCommand::SetUsername { client_id, username },
        ClientMessage::SendMessage {
            room,
            content,
            encrypt,
            priority,
        } => ServerCommand::SendMessage {
            client_id,
            room,
            content,
            encrypt,
            priority,
        },
        ClientMessage::CreateRoom {
            room_id,
            name,
            is_private,
            max_members,
            description,
        } => ServerCommand::CreateRoom {
            client_id,
            room_id,
            name,
            is_private,
            max_members,
            description,
        },
        ClientMessage::DeleteRoom { room_id } => ServerCommand::DeleteRoom { client_id, room_id },
        ClientMessage::JoinRoom { room_id } => ServerCommand::JoinRoom { client_id, room_id },
        ClientMessage::LeaveRoom { room_id } => ServerCommand::LeaveRoom { client_id, room_id },
        ClientMessage::GetRooms => ServerCommand::GetRooms { client_id },
        ClientMessage::GetRoomMembers { room_id } => ServerCommand::GetRoomMembers { client_id, room_id },
        ClientMessage::MakeAdmin { room_id, username } => ServerCommand::MakeAdmin {
            client_id,
            room_id,
            username,
        },
        ClientMessage::PrivateMessage {
            receiver,
            content,
            encrypt,
        } => ServerCommand::PrivateMessage {
            client_id,
            receiver,
            content,
            encrypt,
        },
        ClientMessage::GetConversation { with_user } => ServerCommand::GetConversation { client_id, with_user },
        ClientMessage::MarkRead { with_user } => ServerCommand::MarkRead { client_id, with_user },
        ClientMessage::GetUnreadCount => ServerCommand::GetUnreadCount { client_id },
        ClientMessage::SetPolicy { policy } => ServerCommand::SetPolicy { client_id, policy },
        ClientMessage::GetStats => ServerCommand::GetStats { client_id },
    }
}
