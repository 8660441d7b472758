//! QuikTalk chat coordinator
//!
//! An in-memory WebSocket chat server built with tokio-tungstenite
//! using the Actor pattern for state management.
//!
//! # Features
//! - Unique display names for every connected user
//! - Named rooms with capacity, admins and bounded history
//! - Room messages ordered by a selectable admission policy
//!   (FCFS, LRU-coalescing, round-robin, priority)
//! - Private conversations with read tracking
//! - Best-effort AES-256-GCM payload encryption with per-room keys
//! - Structured event logging through an injected sink
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning every store
//! - Each connection has a `handler` task communicating with the server
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use quiktalk::{handle_connection, ChatServer, Config, TracingSink};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(ChatServer::new(Config::default(), cmd_rx, Arc::new(TracingSink)).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod conversation;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod room;
pub mod room_store;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use client::Client;
pub use config::Config;
pub use conversation::{conversation_id, ConversationStore};
pub use crypto::{EncryptionGateway, KeyMaterial};
pub use error::{AppError, EncryptionError, MessageError, RegistryError, RoomError, SendError};
pub use events::{ChatEvent, EventSink, MemorySink, TracingSink};
pub use handler::handle_connection;
pub use message::{Message, MessageKind, PrivateMessage};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage, Stats};
pub use room::{Room, RoomInfo, RoomSpec};
pub use room_store::RoomStore;
pub use router::MessageRouter;
pub use scheduler::{AdmissionPolicy, PolicyKind};
pub use server::{ChatServer, ServerCommand};
pub use types::{ClientId, RoomId, Stamp};
pub use user::{User, UserRegistry};
