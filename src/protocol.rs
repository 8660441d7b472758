//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, MessageError, RegistryError, RoomError};
use crate::message::{Message, PrivateMessage};
use crate::room::RoomInfo;
use crate::scheduler::PolicyKind;

fn default_true() -> bool {
    true
}

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Pick a username (required before anything else)
    SetUsername { username: String },
    /// Post to a room; the default room when none is given
    SendMessage {
        #[serde(default)]
        room: Option<String>,
        content: String,
        #[serde(default)]
        encrypt: bool,
        #[serde(default)]
        priority: Option<i32>,
    },
    CreateRoom {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        max_members: Option<usize>,
        #[serde(default)]
        description: String,
    },
    DeleteRoom { room_id: String },
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    GetRooms,
    GetRoomMembers {
        #[serde(default)]
        room_id: Option<String>,
    },
    MakeAdmin { room_id: String, username: String },
    /// Direct message; encrypted unless the client opts out
    PrivateMessage {
        receiver: String,
        content: String,
        #[serde(default = "default_true")]
        encrypt: bool,
    },
    GetConversation { with_user: String },
    MarkRead { with_user: String },
    GetUnreadCount,
    SetPolicy { policy: String },
    GetStats,
}

/// Server counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub users_online: usize,
    pub rooms: usize,
    pub users_in_rooms: usize,
    pub pending_messages: usize,
    pub conversations: usize,
    pub policy: PolicyKind,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection successful, client ID issued
    Connected { client_id: String },
    /// Username accepted; carries the assigned display name
    UsernameSet { username: String },
    /// Everyone currently online
    UserList { users: Vec<String> },
    /// Announcement from the server
    System { content: String },
    /// Room message delivered to members
    ReceiveMessage { message: Message },
    RoomCreated { room: RoomInfo },
    RoomDeleted { room_id: String },
    RoomList { rooms: Vec<RoomInfo> },
    /// Join succeeded; recent history included
    JoinedRoom { room: RoomInfo, history: Vec<Message> },
    LeftRoom { room_id: String },
    UserJoinedRoom { username: String, room_id: String },
    UserLeftRoom { username: String, room_id: String },
    RoomMembers { room_id: String, members: Vec<String> },
    AdminGranted { room_id: String, username: String },
    /// Direct message for the receiver
    PrivateMessage { message: PrivateMessage },
    /// Direct message confirmation for the sender
    PrivateMessageSent { message: PrivateMessage },
    ConversationHistory {
        with_user: String,
        messages: Vec<PrivateMessage>,
    },
    MarkedRead { with_user: String, count: usize },
    UnreadCount { count: usize },
    PolicySet { policy: PolicyKind },
    Stats { stats: Stats },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Attempted action without setting username
    UsernameRequired,
    AlreadyRegistered,
    InvalidUsername,
    EmptyMessage,
    MessageTooLong,
    RoomExists,
    /// Non-existent room id
    RoomNotFound,
    /// Room reached its member limit
    RoomFull,
    /// Requester is not a room admin
    Forbidden,
    /// Default room cannot be deleted or left
    Protected,
    InvalidRoomId,
    UserNotFound,
    UnknownPolicy,
    /// Invalid message format
    InvalidMessage,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        let code = match &err {
            AppError::NotRegistered => ErrorCode::UsernameRequired,
            AppError::Registry(RegistryError::AlreadyRegistered(_)) => {
                ErrorCode::AlreadyRegistered
            }
            AppError::Registry(RegistryError::InvalidUsername) => ErrorCode::InvalidUsername,
            AppError::Message(MessageError::Empty) => ErrorCode::EmptyMessage,
            AppError::Message(MessageError::TooLong { .. }) => ErrorCode::MessageTooLong,
            AppError::Room(RoomError::AlreadyExists(_)) => ErrorCode::RoomExists,
            AppError::Room(RoomError::NotFound(_)) => ErrorCode::RoomNotFound,
            AppError::Room(RoomError::RoomFull(_)) => ErrorCode::RoomFull,
            AppError::Room(RoomError::Forbidden) => ErrorCode::Forbidden,
            AppError::Room(RoomError::Protected) => ErrorCode::Protected,
            AppError::Room(RoomError::InvalidRoomId) => ErrorCode::InvalidRoomId,
            AppError::UserNotFound(_) => ErrorCode::UserNotFound,
            AppError::UnknownPolicy(_) => ErrorCode::UnknownPolicy,
            AppError::Json(e) => {
                return ServerMessage::Error {
                    code: ErrorCode::InvalidMessage,
                    message: format!("Invalid message format: {}", e),
                };
            }
            // Fatal errors are not typically converted (connection closes)
            _ => {
                return ServerMessage::Error {
                    code: ErrorCode::InvalidMessage,
                    message: "Internal error".to_string(),
                };
            }
        };
        ServerMessage::Error { code, message }
    }
}
