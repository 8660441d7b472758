//! End-to-end flows through the ChatServer actor, without sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use quiktalk::crypto::decrypt;
use quiktalk::events::{ConnectionAction, RoomAction};
use quiktalk::{
    ChatEvent, ChatServer, ClientId, Config, EncryptionError, ErrorCode, KeyMaterial, MemorySink,
    Message, PolicyKind, ServerCommand, ServerMessage, Stats,
};

struct Harness {
    cmd_tx: mpsc::Sender<ServerCommand>,
    sink: Arc<MemorySink>,
}

struct Conn {
    id: ClientId,
    name: String,
    /// Last user list seen while registering
    users: Vec<String>,
    rx: mpsc::Receiver<ServerMessage>,
}

fn start(config: Config) -> Harness {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let sink = Arc::new(MemorySink::new());
    tokio::spawn(ChatServer::new(config, cmd_rx, sink.clone()).run());
    Harness { cmd_tx, sink }
}

impl Harness {
    async fn send(&self, cmd: ServerCommand) {
        self.cmd_tx.send(cmd).await.unwrap();
    }

    /// Queue without yielding, so several commands land in one batch
    fn queue(&self, cmd: ServerCommand) {
        self.cmd_tx.try_send(cmd).unwrap();
    }

    async fn connect(&self) -> Conn {
        let (tx, rx) = mpsc::channel(256);
        let id = ClientId::new();
        self.send(ServerCommand::Connect { client_id: id, sender: tx })
            .await;
        Conn {
            id,
            name: String::new(),
            users: Vec::new(),
            rx,
        }
    }

    async fn register(&self, username: &str) -> Conn {
        let mut conn = self.connect().await;
        self.send(ServerCommand::SetUsername {
            client_id: conn.id,
            username: username.to_string(),
        })
        .await;
        // the user list is broadcast before the registration is confirmed
        let mut users = Vec::new();
        conn.name = conn
            .next(|m| match m {
                ServerMessage::UserList { users: list } => {
                    users = list;
                    None
                }
                ServerMessage::UsernameSet { username } => Some(username),
                _ => None,
            })
            .await;
        conn.users = users;
        conn
    }

    async fn stats(&self, conn: &mut Conn) -> Stats {
        self.send(ServerCommand::GetStats { client_id: conn.id }).await;
        conn.next(|m| match m {
            ServerMessage::Stats { stats } => Some(stats),
            _ => None,
        })
        .await
    }

    async fn set_policy(&self, conn: &mut Conn, policy: &str) {
        self.send(ServerCommand::SetPolicy {
            client_id: conn.id,
            policy: policy.to_string(),
        })
        .await;
        conn.next(|m| match m {
            ServerMessage::PolicySet { .. } => Some(()),
            _ => None,
        })
        .await;
    }

    fn say(&self, conn: &Conn, content: &str, priority: Option<i32>) -> ServerCommand {
        ServerCommand::SendMessage {
            client_id: conn.id,
            room: None,
            content: content.to_string(),
            encrypt: false,
            priority,
        }
    }
}

impl Conn {
    /// Wait for the first message `pick` accepts, skipping the rest
    async fn next<T>(&mut self, mut pick: impl FnMut(ServerMessage) -> Option<T>) -> T {
        loop {
            let msg = timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for server")
                .expect("server closed the channel");
            if let Some(value) = pick(msg) {
                return value;
            }
        }
    }

    async fn next_error(&mut self) -> ErrorCode {
        self.next(|m| match m {
            ServerMessage::Error { code, .. } => Some(code),
            _ => None,
        })
        .await
    }

    async fn next_chat(&mut self) -> Message {
        self.next(|m| match m {
            ServerMessage::ReceiveMessage { message } => Some(message),
            _ => None,
        })
        .await
    }

    /// Everything already delivered, without waiting
    fn drain(&mut self) -> Vec<ServerMessage> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }
}

fn create_room(conn: &Conn, id: &str, max_members: Option<usize>) -> ServerCommand {
    ServerCommand::CreateRoom {
        client_id: conn.id,
        room_id: id.to_string(),
        name: None,
        is_private: false,
        max_members,
        description: String::new(),
    }
}

fn join(conn: &Conn, id: &str) -> ServerCommand {
    ServerCommand::JoinRoom {
        client_id: conn.id,
        room_id: id.to_string(),
    }
}

#[tokio::test]
async fn identical_usernames_get_distinct_display_names() {
    let server = start(Config::default());
    let a = server.register("alice").await;
    let mut b = server.register("alice").await;

    assert_ne!(a.name, b.name);
    assert!(a.name.contains("alice") && b.name.contains("alice"));
    assert_eq!(a.users, vec![a.name.clone()]);
    assert_eq!(b.users, vec![a.name.clone(), b.name.clone()]);
    assert_eq!(server.stats(&mut b).await.users_online, 2);
}

#[tokio::test]
async fn stalled_reader_does_not_block_other_users() {
    let server = start(Config::default());
    let mut bob = server.register("bob").await;

    // a connection whose outbound buffer is never drained
    let (tx, _stalled_rx) = mpsc::channel(1);
    let slow = ClientId::new();
    server
        .send(ServerCommand::Connect { client_id: slow, sender: tx })
        .await;
    server
        .send(ServerCommand::SetUsername {
            client_id: slow,
            username: "slow".to_string(),
        })
        .await;

    // plenty of broadcasts to overflow the stalled buffer
    for i in 0..10 {
        server.send(create_room(&bob, &format!("room-{}", i), None)).await;
        server.send(server.say(&bob, &format!("hello {}", i), None)).await;
    }

    let stats = server.stats(&mut bob).await;
    assert_eq!(stats.users_online, 2);
    assert_eq!(stats.rooms, 11);
    assert_eq!(stats.pending_messages, 0);
}

#[tokio::test]
async fn registration_joins_default_room_and_is_logged() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;

    server
        .send(ServerCommand::GetRoomMembers {
            client_id: a.id,
            room_id: None,
        })
        .await;
    let (room_id, members) = a
        .next(|m| match m {
            ServerMessage::RoomMembers { room_id, members } => Some((room_id, members)),
            _ => None,
        })
        .await;
    assert_eq!(room_id, "general");
    assert_eq!(members, vec![a.name.clone()]);

    let events = server.sink.events();
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::Connection { action: ConnectionAction::Register, display_name: Some(n), .. } if *n == a.name
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::Room { action: RoomAction::Join, .. }
    )));
}

#[tokio::test]
async fn reregistration_is_rejected_without_change() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;

    server
        .send(ServerCommand::SetUsername {
            client_id: a.id,
            username: "mallory".to_string(),
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::AlreadyRegistered);
    assert_eq!(server.stats(&mut a).await.users_online, 1);
}

#[tokio::test]
async fn events_from_unregistered_connections_are_ignored() {
    let server = start(Config::default());
    let mut ghost = server.connect().await;

    server.send(server.say(&ghost, "boo", None)).await;
    server.send(join(&ghost, "general")).await;
    let stats = server.stats(&mut ghost).await;

    assert_eq!(stats.users_online, 0);
    assert_eq!(stats.users_in_rooms, 0);
    assert_eq!(stats.pending_messages, 0);
    assert!(ghost.drain().is_empty());
}

#[tokio::test]
async fn room_capacity_is_enforced() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server.send(create_room(&a, "team", Some(1))).await;
    let room = a
        .next(|m| match m {
            ServerMessage::RoomCreated { room } => Some(room),
            _ => None,
        })
        .await;
    assert_eq!(room.max_members, 1);
    assert_eq!(room.admins, vec![a.name.clone()]);

    server.send(join(&a, "team")).await;
    a.next(|m| match m {
        ServerMessage::JoinedRoom { room, .. } => Some(room),
        _ => None,
    })
    .await;

    server.send(join(&b, "team")).await;
    assert_eq!(b.next_error().await, ErrorCode::RoomFull);

    server.send(create_room(&b, "Team", None)).await;
    assert_eq!(b.next_error().await, ErrorCode::RoomExists);
}

#[tokio::test]
async fn default_room_cannot_be_deleted_or_left() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;

    server
        .send(ServerCommand::DeleteRoom {
            client_id: a.id,
            room_id: "general".to_string(),
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::Protected);

    server
        .send(ServerCommand::LeaveRoom {
            client_id: a.id,
            room_id: "general".to_string(),
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::Protected);
}

#[tokio::test]
async fn only_admins_delete_rooms() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server.send(create_room(&a, "team", None)).await;
    server.send(join(&b, "team")).await;
    b.next(|m| match m {
        ServerMessage::JoinedRoom { .. } => Some(()),
        _ => None,
    })
    .await;

    server
        .send(ServerCommand::DeleteRoom {
            client_id: b.id,
            room_id: "team".to_string(),
        })
        .await;
    assert_eq!(b.next_error().await, ErrorCode::Forbidden);

    server
        .send(ServerCommand::MakeAdmin {
            client_id: a.id,
            room_id: "team".to_string(),
            username: b.name.clone(),
        })
        .await;
    b.next(|m| match m {
        ServerMessage::AdminGranted { .. } => Some(()),
        _ => None,
    })
    .await;

    server
        .send(ServerCommand::DeleteRoom {
            client_id: b.id,
            room_id: "team".to_string(),
        })
        .await;
    let deleted = b
        .next(|m| match m {
            ServerMessage::RoomDeleted { room_id } => Some(room_id),
            _ => None,
        })
        .await;
    assert_eq!(deleted, "team");
    assert_eq!(server.stats(&mut a).await.rooms, 1);
}

#[tokio::test]
async fn disconnect_releases_every_membership_once() {
    let server = start(Config::default());
    let a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server.send(create_room(&b, "team", None)).await;
    server.send(join(&a, "team")).await;
    server.send(join(&b, "team")).await;
    b.next(|m| match m {
        ServerMessage::JoinedRoom { .. } => Some(()),
        _ => None,
    })
    .await;

    server.send(ServerCommand::Disconnect { client_id: a.id }).await;
    let mut left_rooms = Vec::new();
    while left_rooms.len() < 2 {
        let (user, room) = b
            .next(|m| match m {
                ServerMessage::UserLeftRoom { username, room_id } => Some((username, room_id)),
                _ => None,
            })
            .await;
        assert_eq!(user, a.name);
        left_rooms.push(room);
    }
    left_rooms.sort();
    assert_eq!(left_rooms, vec!["general", "team"]);

    // second disconnect for the same connection changes nothing
    server.send(ServerCommand::Disconnect { client_id: a.id }).await;
    let stats = server.stats(&mut b).await;
    assert_eq!(stats.users_online, 1);
    assert_eq!(stats.users_in_rooms, 2);

    for room in ["general", "team"] {
        server
            .send(ServerCommand::GetRoomMembers {
                client_id: b.id,
                room_id: Some(room.to_string()),
            })
            .await;
        let members = b
            .next(|m| match m {
                ServerMessage::RoomMembers { members, .. } => Some(members),
                _ => None,
            })
            .await;
        assert_eq!(members, vec![b.name.clone()]);
    }
}

#[tokio::test]
async fn invalid_messages_go_back_to_sender_only() {
    let mut config = Config::default();
    config.max_message_length = 5;
    let server = start(config);
    let mut a = server.register("alice").await;

    server.send(server.say(&a, "   ", None)).await;
    assert_eq!(a.next_error().await, ErrorCode::EmptyMessage);

    server.send(server.say(&a, "too long", None)).await;
    assert_eq!(a.next_error().await, ErrorCode::MessageTooLong);

    assert_eq!(server.stats(&mut a).await.pending_messages, 0);
    assert!(!a
        .drain()
        .iter()
        .any(|m| matches!(m, ServerMessage::ReceiveMessage { .. })));
}

#[tokio::test]
async fn room_messages_reach_members_and_history() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server.send(server.say(&a, "hello all", None)).await;
    let seen_by_a = a.next_chat().await;
    let seen_by_b = b.next_chat().await;
    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(seen_by_b.sender, a.name);
    assert_eq!(seen_by_b.content, "hello all");
    assert!(!seen_by_b.encrypted);

    // a newcomer to a room gets its recent history
    server.send(create_room(&a, "team", None)).await;
    server.send(join(&a, "team")).await;
    server
        .send(ServerCommand::SendMessage {
            client_id: a.id,
            room: Some("team".to_string()),
            content: "secret plans".to_string(),
            encrypt: true,
            priority: None,
        })
        .await;
    let sealed = a.next_chat().await;
    assert!(sealed.encrypted);
    assert_ne!(sealed.content, "secret plans");

    server.send(join(&b, "team")).await;
    let history = b
        .next(|m| match m {
            ServerMessage::JoinedRoom { history, .. } => Some(history),
            _ => None,
        })
        .await;
    assert_eq!(history, vec![sealed]);
}

#[tokio::test]
async fn rejoining_a_room_announces_nothing() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server.send(create_room(&a, "team", None)).await;
    server.send(join(&b, "team")).await;
    server.send(join(&a, "team")).await;
    a.next(|m| match m {
        ServerMessage::JoinedRoom { .. } => Some(()),
        _ => None,
    })
    .await;
    b.drain();

    // second join still answers the joiner
    server.send(join(&a, "team")).await;
    let room = a
        .next(|m| match m {
            ServerMessage::JoinedRoom { room, .. } => Some(room),
            _ => None,
        })
        .await;
    assert_eq!(room.member_count, 2);

    server.stats(&mut b).await;
    let announced = b
        .drain()
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::UserJoinedRoom { username, .. } if *username == a.name))
        .count();
    assert_eq!(announced, 0);

    let joins = server
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, ChatEvent::Room { action: RoomAction::Join, actor, room } if *actor == a.name && room.as_str() == "team"))
        .count();
    assert_eq!(joins, 1);
}

#[tokio::test]
async fn created_rooms_encrypt_with_their_own_key() {
    let mut config = Config::default();
    config.master_secret = Some("master".to_string());
    let master = KeyMaterial::derive("master");
    let server = start(config);
    let mut a = server.register("alice").await;

    let sender = a.id;
    let sealed_say = move |room: Option<&str>| ServerCommand::SendMessage {
        client_id: sender,
        room: room.map(str::to_string),
        content: "secret".to_string(),
        encrypt: true,
        priority: None,
    };

    server.send(sealed_say(None)).await;
    let in_general = a.next_chat().await;
    assert!(in_general.encrypted);
    assert_eq!(decrypt(&in_general.content, &master).unwrap(), "secret");

    server.send(create_room(&a, "team", None)).await;
    server.send(join(&a, "team")).await;
    server.send(sealed_say(Some("team"))).await;
    let in_team = a.next_chat().await;
    assert!(in_team.encrypted);
    assert_eq!(
        decrypt(&in_team.content, &master),
        Err(EncryptionError::Tampered)
    );
}

#[tokio::test]
async fn unknown_room_is_reported() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    server
        .send(ServerCommand::SendMessage {
            client_id: a.id,
            room: Some("nowhere".to_string()),
            content: "hi".to_string(),
            encrypt: false,
            priority: None,
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::RoomNotFound);
}

#[tokio::test]
async fn priority_policy_orders_a_burst() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    server.set_policy(&mut a, "priority").await;

    server.queue(server.say(&a, "a", Some(1)));
    server.queue(server.say(&a, "b", Some(5)));
    server.queue(server.say(&a, "c", Some(1)));

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(a.next_chat().await.content);
    }
    assert_eq!(order, vec!["b", "a", "c"]);
}

#[tokio::test]
async fn lru_policy_coalesces_identical_pending_messages() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    server.set_policy(&mut a, "lru").await;

    server.queue(server.say(&a, "ping", None));
    server.queue(server.say(&a, "ping", None));

    let first = a.next_chat().await;
    assert_eq!(first.content, "ping");

    let stats = server.stats(&mut a).await;
    assert_eq!(stats.policy, PolicyKind::Lru);
    assert_eq!(stats.pending_messages, 0);
    assert!(!a
        .drain()
        .iter()
        .any(|m| matches!(m, ServerMessage::ReceiveMessage { .. })));
}

#[tokio::test]
async fn unknown_policy_is_rejected() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    server
        .send(ServerCommand::SetPolicy {
            client_id: a.id,
            policy: "shortest-job-first".to_string(),
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::UnknownPolicy);
    assert_eq!(server.stats(&mut a).await.policy, PolicyKind::Fcfs);
}

#[tokio::test(start_paused = true)]
async fn round_robin_spaces_dispatches() {
    let mut config = Config::default();
    config.policy = PolicyKind::RoundRobin;
    config.round_robin_delay = Duration::from_millis(100);
    let server = start(config);
    let mut a = server.register("alice").await;

    for text in ["1", "2", "3"] {
        server.queue(server.say(&a, text, None));
    }

    let mut arrivals = Vec::new();
    for expected in ["1", "2", "3"] {
        let message = a.next_chat().await;
        assert_eq!(message.content, expected);
        arrivals.push(Instant::now());
    }
    for pair in arrivals.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(100));
    }

    // the actor stays responsive while dispatches are spaced out
    server.queue(server.say(&a, "4", None));
    server.queue(server.say(&a, "5", None));
    let stats = server.stats(&mut a).await;
    assert_eq!(stats.users_online, 1);
}

#[tokio::test]
async fn private_messages_are_encrypted_and_tracked() {
    let mut config = Config::default();
    config.master_secret = Some("test-secret".to_string());
    let server = start(config);
    let mut a = server.register("alice").await;
    let mut b = server.register("bob").await;

    server
        .send(ServerCommand::PrivateMessage {
            client_id: a.id,
            receiver: b.name.clone(),
            content: "just us".to_string(),
            encrypt: true,
        })
        .await;

    let received = b
        .next(|m| match m {
            ServerMessage::PrivateMessage { message } => Some(message),
            _ => None,
        })
        .await;
    assert!(received.encrypted);
    assert_ne!(received.content, "just us");
    assert!(!received.read);

    let confirmed = a
        .next(|m| match m {
            ServerMessage::PrivateMessageSent { message } => Some(message),
            _ => None,
        })
        .await;
    assert_eq!(confirmed.id, received.id);

    // both sides read the same, decrypted thread
    let (a_name, b_name) = (a.name.clone(), b.name.clone());
    for (conn, other) in [(&mut a, b_name), (&mut b, a_name)] {
        server
            .send(ServerCommand::GetConversation {
                client_id: conn.id,
                with_user: other,
            })
            .await;
        let messages = conn
            .next(|m| match m {
                ServerMessage::ConversationHistory { messages, .. } => Some(messages),
                _ => None,
            })
            .await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "just us");
        assert!(!messages[0].encrypted);
    }

    server
        .send(ServerCommand::GetUnreadCount { client_id: b.id })
        .await;
    let unread = b
        .next(|m| match m {
            ServerMessage::UnreadCount { count } => Some(count),
            _ => None,
        })
        .await;
    assert_eq!(unread, 1);

    server
        .send(ServerCommand::MarkRead {
            client_id: b.id,
            with_user: a.name.clone(),
        })
        .await;
    let flipped = b
        .next(|m| match m {
            ServerMessage::MarkedRead { count, .. } => Some(count),
            _ => None,
        })
        .await;
    assert_eq!(flipped, 1);

    server
        .send(ServerCommand::GetUnreadCount { client_id: b.id })
        .await;
    let unread = b
        .next(|m| match m {
            ServerMessage::UnreadCount { count } => Some(count),
            _ => None,
        })
        .await;
    assert_eq!(unread, 0);
}

#[tokio::test]
async fn private_message_to_unknown_user_fails() {
    let server = start(Config::default());
    let mut a = server.register("alice").await;
    server
        .send(ServerCommand::PrivateMessage {
            client_id: a.id,
            receiver: "user99 (nobody)".to_string(),
            content: "hello?".to_string(),
            encrypt: false,
        })
        .await;
    assert_eq!(a.next_error().await, ErrorCode::UserNotFound);
}
