//! ChatServer Actor implementation
//!
//! The central actor that owns every store: users, rooms, the message router,
//! private conversations and the encryption gateway. All mutation happens on
//! this one task, so cross-store invariants never race.
//! Uses the Actor pattern with mpsc channels for message passing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::crypto::EncryptionGateway;
use crate::error::{AppError, RoomError, SendError};
use crate::events::{ChatEvent, ConnectionAction, EventSink, RoomAction};
use crate::message::Message;
use crate::protocol::{ServerMessage, Stats};
use crate::room::RoomSpec;
use crate::room_store::RoomStore;
use crate::router::{MessageRouter, Submission};
use crate::scheduler::{PolicyKind, DEFAULT_PRIORITY};
use crate::types::{ClientId, RoomId};
use crate::user::UserRegistry;

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    Connect {
        client_id: ClientId,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// Client disconnected
    Disconnect { client_id: ClientId },
    /// Register under a username
    SetUsername { client_id: ClientId, username: String },
    /// Post a message to a room
    SendMessage {
        client_id: ClientId,
        room: Option<String>,
        content: String,
        encrypt: bool,
        priority: Option<i32>,
    },
    CreateRoom {
        client_id: ClientId,
        room_id: String,
        name: Option<String>,
        is_private: bool,
        max_members: Option<usize>,
        description: String,
    },
    DeleteRoom { client_id: ClientId, room_id: String },
    JoinRoom { client_id: ClientId, room_id: String },
    LeaveRoom { client_id: ClientId, room_id: String },
    GetRooms { client_id: ClientId },
    GetRoomMembers {
        client_id: ClientId,
        room_id: Option<String>,
    },
    MakeAdmin {
        client_id: ClientId,
        room_id: String,
        username: String,
    },
    PrivateMessage {
        client_id: ClientId,
        receiver: String,
        content: String,
        encrypt: bool,
    },
    GetConversation { client_id: ClientId, with_user: String },
    MarkRead { client_id: ClientId, with_user: String },
    GetUnreadCount { client_id: ClientId },
    SetPolicy { client_id: ClientId, policy: String },
    GetStats { client_id: ClientId },
}

impl ServerCommand {
    /// Connection the command came from
    pub fn client_id(&self) -> ClientId {
        match self {
            ServerCommand::Connect { client_id, .. }
            | ServerCommand::Disconnect { client_id }
            | ServerCommand::SetUsername { client_id, .. }
            | ServerCommand::SendMessage { client_id, .. }
            | ServerCommand::CreateRoom { client_id, .. }
            | ServerCommand::DeleteRoom { client_id, .. }
            | ServerCommand::JoinRoom { client_id, .. }
            | ServerCommand::LeaveRoom { client_id, .. }
            | ServerCommand::GetRooms { client_id }
            | ServerCommand::GetRoomMembers { client_id, .. }
            | ServerCommand::MakeAdmin { client_id, .. }
            | ServerCommand::PrivateMessage { client_id, .. }
            | ServerCommand::GetConversation { client_id, .. }
            | ServerCommand::MarkRead { client_id, .. }
            | ServerCommand::GetUnreadCount { client_id }
            | ServerCommand::SetPolicy { client_id, .. }
            | ServerCommand::GetStats { client_id } => *client_id,
        }
    }
}

/// The main ChatServer actor
///
/// Processes commands from connection handlers. Commands that are already
/// queued are handled as one batch before pending room messages are
/// dispatched, so the admission policy sees concurrent sends together.
pub struct ChatServer {
    config: Config,
    /// Live connections: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    users: UserRegistry,
    rooms: RoomStore,
    router: MessageRouter,
    conversations: ConversationStore,
    gateway: EncryptionGateway,
    events: Arc<dyn EventSink>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
    /// Wake-ups from the dispatch pacing timer
    ticks: mpsc::UnboundedReceiver<()>,
    tick_sender: mpsc::UnboundedSender<()>,
    /// A pacing timer is running; dispatch waits for it
    paced: bool,
}

impl ChatServer {
    /// Create a new ChatServer with the given configuration and command receiver
    pub fn new(
        config: Config,
        receiver: mpsc::Receiver<ServerCommand>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let default_room = RoomId::from_string(&config.default_room_id);
        let (tick_sender, ticks) = mpsc::unbounded_channel();

        Self {
            clients: HashMap::new(),
            users: UserRegistry::new(default_room.clone()),
            rooms: RoomStore::new(
                default_room,
                &config.default_room_name,
                config.room_capacity,
                config.room_history_limit,
            ),
            router: MessageRouter::new(
                config.max_message_length,
                config.policy,
                config.round_robin_delay,
                events.clone(),
            ),
            conversations: ConversationStore::new(config.conversation_history_limit, events.clone()),
            gateway: EncryptionGateway::new(config.master_secret.as_deref()),
            events,
            receiver,
            ticks,
            tick_sender,
            paced: false,
            config,
        }
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started (policy: {})", self.router.policy());

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                    while let Ok(cmd) = self.receiver.try_recv() {
                        self.handle_command(cmd);
                    }
                    self.flush();
                }
                Some(()) = self.ticks.recv() => {
                    self.paced = false;
                    self.flush();
                }
            }
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        let client_id = cmd.client_id();

        let result = match cmd {
            ServerCommand::Connect { client_id, sender } => {
                self.handle_connect(client_id, sender);
                Ok(())
            }
            ServerCommand::Disconnect { client_id } => {
                self.handle_disconnect(client_id);
                Ok(())
            }
            ServerCommand::SetUsername { client_id, username } => self.handle_set_username(client_id, username),
            ServerCommand::SendMessage {
                client_id,
                room,
                content,
                encrypt,
                priority,
            } => self.handle_send_message(client_id, room, content, encrypt, priority),
            ServerCommand::CreateRoom {
                client_id,
                room_id,
                name,
                is_private,
                max_members,
                description,
            } => {
                self.handle_create_room(client_id, room_id, name, is_private, max_members, description)
            }
            ServerCommand::DeleteRoom { client_id, room_id } => self.handle_delete_room(client_id, room_id),
            ServerCommand::JoinRoom { client_id, room_id } => self.handle_join_room(client_id, room_id),
            ServerCommand::LeaveRoom { client_id, room_id } => self.handle_leave_room(client_id, room_id),
            ServerCommand::GetRooms { client_id } => {
                let rooms = self.rooms.list_rooms(false);
                self.send_to(client_id, ServerMessage::RoomList { rooms });
                Ok(())
            }
            ServerCommand::GetRoomMembers { client_id, room_id } => {
                let room = room_id
                    .map(|id| RoomId::from_string(&id))
                    .unwrap_or_else(|| self.rooms.default_room().clone());
                let members = self.rooms.get_members(&room);
                self.send_to(
                    client_id,
                    ServerMessage::RoomMembers {
                        room_id: room.to_string(),
                        members,
                    },
                );
                Ok(())
            }
            ServerCommand::MakeAdmin {
                client_id,
                room_id,
                username,
            } => self.handle_make_admin(client_id, room_id, username),
            ServerCommand::PrivateMessage {
                client_id,
                receiver,
                content,
                encrypt,
            } => self.handle_private_message(client_id, receiver, content, encrypt),
            ServerCommand::GetConversation { client_id, with_user } => {
                self.handle_get_conversation(client_id, with_user)
            }
            ServerCommand::MarkRead { client_id, with_user } => {
                self.handle_mark_read(client_id, with_user)
            }
            ServerCommand::GetUnreadCount { client_id } => self.handle_unread_count(client_id),
            ServerCommand::SetPolicy { client_id, policy } => self.handle_set_policy(client_id, policy),
            ServerCommand::GetStats { client_id } => {
                let stats = self.stats();
                self.send_to(client_id, ServerMessage::Stats { stats });
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(AppError::NotRegistered) => {
                debug!("Ignoring event from unregistered client {}", client_id);
            }
            Err(err) => {
                debug!("Client {} request failed: {}", client_id, err);
                self.send_to(client_id, err.into());
            }
        }
    }

    /// Handle new client connection
    fn handle_connect(&mut self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        info!("Client {} connected", client_id);
        self.clients.insert(client_id, Client::new(client_id, sender));
        self.events.record(&ChatEvent::Connection {
            client: client_id,
            display_name: None,
            action: ConnectionAction::Connect,
        });
        debug!(
            "Total clients: {}, Total rooms: {}",
            self.clients.len(),
            self.rooms.room_count()
        );
    }

    /// Handle client disconnection
    ///
    /// Safe to repeat: a second disconnect finds nothing to clean up.
    fn handle_disconnect(&mut self, client_id: ClientId) {
        self.clients.remove(&client_id);

        let Some(user) = self.users.unregister(client_id) else {
            debug!("Client {} disconnected without a user record", client_id);
            return;
        };

        let left = self.rooms.leave_all_rooms(client_id, &user.display_name);
        info!(
            "Client {} ({}) disconnected, left {} room(s)",
            client_id,
            user.display_name,
            left.len()
        );
        self.events.record(&ChatEvent::Connection {
            client: client_id,
            display_name: Some(user.display_name.clone()),
            action: ConnectionAction::Disconnect,
        });

        self.broadcast(ServerMessage::System {
            content: format!("{} has left the chat", user.display_name),
        });
        self.broadcast_user_list();

        for room in left {
            self.send_to_room(
                &room,
                ServerMessage::UserLeftRoom {
                    username: user.display_name.clone(),
                    room_id: room.to_string(),
                },
            );
        }
    }

    /// Handle username setting: register, then enter the default room
    fn handle_set_username(&mut self, client_id: ClientId, username: String) -> Result<(), AppError> {
        let user = self.users.register(client_id, &username)?;
        info!("Client {} registered as '{}'", client_id, user.display_name);
        self.events.record(&ChatEvent::Connection {
            client: client_id,
            display_name: Some(user.display_name.clone()),
            action: ConnectionAction::Register,
        });

        let general = self.rooms.default_room().clone();
        match self.rooms.join_room(&general, client_id, &user.display_name) {
            Ok(_) => self.events.record(&ChatEvent::Room {
                room: general,
                actor: user.display_name.clone(),
                action: RoomAction::Join,
            }),
            Err(e) => warn!("{} could not enter the default room: {}", user.display_name, e),
        }

        self.broadcast(ServerMessage::System {
            content: format!("{} has joined the chat", user.display_name),
        });
        self.broadcast_user_list();
        self.send_to(
            client_id,
            ServerMessage::UsernameSet {
                username: user.display_name,
            },
        );
        let rooms = self.rooms.list_rooms(false);
        self.send_to(client_id, ServerMessage::RoomList { rooms });
        Ok(())
    }

    /// Validate and queue a room message; delivery happens on the next flush
    fn handle_send_message(
        &mut self,
        client_id: ClientId,
        room: Option<String>,
        content: String,
        encrypt: bool,
        priority: Option<i32>,
    ) -> Result<(), AppError> {
        let sender = self.display_name(client_id)?;
        let room = room
            .map(|id| RoomId::from_string(&id))
            .unwrap_or_else(|| self.rooms.default_room().clone());

        if self.rooms.get_room(&room).is_none() {
            return Err(RoomError::NotFound(room).into());
        }

        self.router.submit(
            Submission {
                sender,
                room,
                content,
                encrypt,
                priority: priority.unwrap_or(DEFAULT_PRIORITY),
            },
            &self.gateway,
        )?;
        Ok(())
    }

    fn handle_create_room(
        &mut self,
        client_id: ClientId,
        room_id: String,
        name: Option<String>,
        is_private: bool,
        max_members: Option<usize>,
        description: String,
    ) -> Result<(), AppError> {
        let creator = self.display_name(client_id)?;
        let id = RoomId::from_string(&room_id);
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.to_string());

        let room = self.rooms.create_room(RoomSpec {
            id: id.clone(),
            name,
            created_by: creator.clone(),
            is_private,
            max_members: max_members.unwrap_or(self.config.room_capacity),
            description,
        })?;

        self.gateway.create_room_key(&id);
        info!("{} created room {}", creator, id);
        self.events.record(&ChatEvent::Room {
            room: id,
            actor: creator,
            action: RoomAction::Create,
        });

        self.send_to(client_id, ServerMessage::RoomCreated { room });
        self.broadcast_room_list();
        Ok(())
    }

    fn handle_delete_room(&mut self, client_id: ClientId, room_id: String) -> Result<(), AppError> {
        let requester = self.display_name(client_id)?;
        let id = RoomId::from_string(&room_id);

        let members = self.rooms.delete_room(&id, &requester)?;
        self.gateway.remove_room_key(&id);

        info!("{} deleted room {}", requester, id);
        self.events.record(&ChatEvent::Room {
            room: id.clone(),
            actor: requester.clone(),
            action: RoomAction::Delete,
        });

        let notice = ServerMessage::RoomDeleted {
            room_id: id.to_string(),
        };
        self.send_to_names(&members, notice.clone());
        if !members.contains(&requester) {
            self.send_to(client_id, notice);
        }
        self.broadcast_room_list();
        Ok(())
    }

    /// Handle room joining; the joiner receives recent history
    ///
    /// Joining a room twice answers the joiner again but announces nothing.
    fn handle_join_room(&mut self, client_id: ClientId, room_id: String) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let id = RoomId::from_string(&room_id);

        let already_member = self.rooms.is_member(&id, &name);
        let room = self.rooms.join_room(&id, client_id, &name)?;
        self.users.set_current_room(client_id, id.clone());
        let history = self.rooms.message_history(&id, self.config.join_history);
        self.send_to(client_id, ServerMessage::JoinedRoom { room, history });

        if already_member {
            return Ok(());
        }

        info!("{} joined room {}", name, id);
        self.events.record(&ChatEvent::Room {
            room: id.clone(),
            actor: name.clone(),
            action: RoomAction::Join,
        });
        self.send_to_room(
            &id,
            ServerMessage::UserJoinedRoom {
                username: name,
                room_id: id.to_string(),
            },
        );
        Ok(())
    }

    /// Handle voluntary room leaving; the default room cannot be left
    fn handle_leave_room(&mut self, client_id: ClientId, room_id: String) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let id = RoomId::from_string(&room_id);

        if id == *self.rooms.default_room() {
            return Err(RoomError::Protected.into());
        }

        let left = self.rooms.leave_room(&id, client_id, &name);
        let general = self.rooms.default_room().clone();
        self.users.set_current_room(client_id, general);

        self.send_to(
            client_id,
            ServerMessage::LeftRoom {
                room_id: id.to_string(),
            },
        );

        if left {
            info!("{} left room {}", name, id);
            self.events.record(&ChatEvent::Room {
                room: id.clone(),
                actor: name.clone(),
                action: RoomAction::Leave,
            });
            self.send_to_room(
                &id,
                ServerMessage::UserLeftRoom {
                    username: name,
                    room_id: id.to_string(),
                },
            );
        }
        Ok(())
    }

    fn handle_make_admin(
        &mut self,
        client_id: ClientId,
        room_id: String,
        username: String,
    ) -> Result<(), AppError> {
        let requester = self.display_name(client_id)?;
        let id = RoomId::from_string(&room_id);

        self.rooms.make_admin(&id, &username, &requester)?;
        self.events.record(&ChatEvent::Room {
            room: id.clone(),
            actor: requester,
            action: RoomAction::MakeAdmin,
        });

        let notice = ServerMessage::AdminGranted {
            room_id: id.to_string(),
            username: username.clone(),
        };
        self.send_to(client_id, notice.clone());
        if let Some(target) = self.users.lookup_by_display_name(&username) {
            if target != client_id {
                self.send_to(target, notice);
            }
        }
        Ok(())
    }

    fn handle_private_message(
        &mut self,
        client_id: ClientId,
        receiver: String,
        content: String,
        encrypt: bool,
    ) -> Result<(), AppError> {
        let sender = self.display_name(client_id)?;
        let receiver_id = self
            .users
            .lookup_by_display_name(&receiver)
            .ok_or_else(|| AppError::UserNotFound(receiver.clone()))?;
        self.router.validate(&content)?;

        let message = self
            .conversations
            .send(&sender, &receiver, &content, encrypt, &self.gateway);

        self.send_to(
            receiver_id,
            ServerMessage::PrivateMessage {
                message: message.clone(),
            },
        );
        self.send_to(client_id, ServerMessage::PrivateMessageSent { message });
        Ok(())
    }

    fn handle_get_conversation(&mut self, client_id: ClientId, with_user: String) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let messages = self
            .conversations
            .get_conversation(&name, &with_user, self.config.conversation_window)
            .into_iter()
            .map(|m| self.conversations.decrypt_for_display(m, &self.gateway))
            .collect();

        self.send_to(
            client_id,
            ServerMessage::ConversationHistory {
                with_user,
                messages,
            },
        );
        Ok(())
    }

    /// Mark everything `with_user` sent to this user as read
    fn handle_mark_read(&mut self, client_id: ClientId, with_user: String) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let count = self.conversations.mark_read(&with_user, &name);
        self.send_to(client_id, ServerMessage::MarkedRead { with_user, count });
        Ok(())
    }

    fn handle_unread_count(&mut self, client_id: ClientId) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let count = self.conversations.unread_count_for(&name);
        self.send_to(client_id, ServerMessage::UnreadCount { count });
        Ok(())
    }

    fn handle_set_policy(&mut self, client_id: ClientId, policy: String) -> Result<(), AppError> {
        let name = self.display_name(client_id)?;
        let kind: PolicyKind = policy.parse().map_err(AppError::UnknownPolicy)?;

        self.router.set_policy(kind);
        info!("{} switched scheduling policy to {}", name, kind);
        self.send_to(client_id, ServerMessage::PolicySet { policy: kind });
        Ok(())
    }

    fn stats(&self) -> Stats {
        Stats {
            users_online: self.users.len(),
            rooms: self.rooms.room_count(),
            users_in_rooms: self.rooms.total_members(),
            pending_messages: self.router.pending(),
            conversations: self.conversations.conversation_count(),
            policy: self.router.policy(),
        }
    }

    /// Dispatch pending room messages
    ///
    /// A policy with a dispatch delay gets one message per call; a timer task
    /// wakes the actor for the next one, so the actor never sleeps itself.
    fn flush(&mut self) {
        if self.paced {
            return;
        }
        while let Some(dispatch) = self.router.dispatch_next(&mut self.rooms) {
            self.deliver(dispatch.message);
            if !dispatch.pause.is_zero() {
                self.pace(dispatch.pause);
                break;
            }
        }
    }

    fn pace(&mut self, pause: Duration) {
        self.paced = true;
        let ticks = self.tick_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            let _ = ticks.send(());
        });
    }

    /// Send a dispatched message to every member of its room
    fn deliver(&self, message: Message) {
        let room = message.room.clone();
        self.send_to_room(&room, ServerMessage::ReceiveMessage { message });
    }

    /// Helper: Display name of a registered connection
    fn display_name(&self, client_id: ClientId) -> Result<String, AppError> {
        self.users
            .display_name(client_id)
            .map(str::to_string)
            .ok_or(AppError::NotRegistered)
    }

    /// Queue a message for one connection without waiting on it
    ///
    /// A connection that stops reading loses messages once its buffer is
    /// full; everyone else is unaffected.
    fn send_to(&self, client_id: ClientId, msg: ServerMessage) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        match client.send(msg) {
            Ok(()) => {}
            Err(SendError::Full) => {
                warn!("Client {} is not reading, message dropped", client_id);
            }
            Err(SendError::ChannelClosed) => {
                debug!("Dropping message for closed client {}", client_id);
            }
        }
    }

    fn send_to_names(&self, names: &[String], msg: ServerMessage) {
        for name in names {
            if let Some(client_id) = self.users.lookup_by_display_name(name) {
                self.send_to(client_id, msg.clone());
            }
        }
    }

    fn send_to_room(&self, room: &RoomId, msg: ServerMessage) {
        let members = self.rooms.get_members(room);
        self.send_to_names(&members, msg);
    }

    /// Helper: Send to every registered user
    fn broadcast(&self, msg: ServerMessage) {
        let targets: Vec<ClientId> = self.users.connections().collect();
        for client_id in targets {
            self.send_to(client_id, msg.clone());
        }
    }

    fn broadcast_user_list(&self) {
        let users = self.users.list_display_names();
        self.broadcast(ServerMessage::UserList { users });
    }

    fn broadcast_room_list(&self) {
        let rooms = self.rooms.list_rooms(false);
        self.broadcast(ServerMessage::RoomList { rooms });
    }
}
