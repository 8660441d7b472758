//! Runtime configuration
//!
//! Values only: limits, defaults, secrets and the scheduling choice.
//! Resolved from built-in defaults, then `QUIKTALK_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::scheduler::PolicyKind;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket listener binds to
    pub bind_addr: String,
    /// Maximum characters in a room message
    pub max_message_length: usize,
    /// Messages retained per room
    pub room_history_limit: usize,
    /// Messages retained per private conversation
    pub conversation_history_limit: usize,
    /// Messages replayed to a user joining a room
    pub join_history: usize,
    /// Messages returned by `get_conversation`
    pub conversation_window: usize,
    pub default_room_id: String,
    pub default_room_name: String,
    /// Capacity for rooms created without an explicit `max_members`
    pub room_capacity: usize,
    /// Master secret for the encryption gateway; random key when absent
    pub master_secret: Option<String>,
    pub policy: PolicyKind,
    /// Gap between dispatches under the round-robin policy
    pub round_robin_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            max_message_length: 1000,
            room_history_limit: 100,
            conversation_history_limit: 100,
            join_history: 50,
            conversation_window: 50,
            default_room_id: "general".to_string(),
            default_room_name: "General".to_string(),
            room_capacity: 50,
            master_secret: None,
            policy: PolicyKind::Fcfs,
            round_robin_delay: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Defaults overridden by any `QUIKTALK_*` variables that are set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve against an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("QUIKTALK_BIND") {
            config.bind_addr = addr;
        }
        if let Some(v) = lookup("QUIKTALK_MAX_MESSAGE_LENGTH") {
            config.max_message_length = parse("QUIKTALK_MAX_MESSAGE_LENGTH", v)?;
        }
        if let Some(v) = lookup("QUIKTALK_ROOM_HISTORY") {
            config.room_history_limit = parse("QUIKTALK_ROOM_HISTORY", v)?;
        }
        if let Some(v) = lookup("QUIKTALK_CONVERSATION_HISTORY") {
            config.conversation_history_limit = parse("QUIKTALK_CONVERSATION_HISTORY", v)?;
        }
        if let Some(id) = lookup("QUIKTALK_DEFAULT_ROOM") {
            config.default_room_id = id;
        }
        if let Some(name) = lookup("QUIKTALK_DEFAULT_ROOM_NAME") {
            config.default_room_name = name;
        }
        if let Some(v) = lookup("QUIKTALK_ROOM_CAPACITY") {
            config.room_capacity = parse("QUIKTALK_ROOM_CAPACITY", v)?;
        }
        if let Some(secret) = lookup("QUIKTALK_SECRET") {
            config.master_secret = Some(secret);
        }
        if let Some(v) = lookup("QUIKTALK_POLICY") {
            config.policy = parse("QUIKTALK_POLICY", v)?;
        }
        if let Some(v) = lookup("QUIKTALK_ROUND_ROBIN_MS") {
            config.round_robin_delay = Duration::from_millis(parse("QUIKTALK_ROUND_ROBIN_MS", v)?);
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}
