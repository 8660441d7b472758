//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: UUID-based unique connection identifier
//! - `RoomId`: slug identifying a room
//! - `Stamp`: wall-clock time plus a monotonic tie-break counter

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique client identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe connection identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room identifier (lower-case slug)
///
/// Parsed from user input: surrounding whitespace is trimmed, the text is
/// lower-cased and inner spaces become `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Create a RoomId from raw input, normalising it to a slug
    pub fn from_string(raw: &str) -> Self {
        Self(raw.trim().to_lowercase().replace(' ', "-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-wide tie-break counter for [`Stamp`]
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Point in time with a monotonic tie-break
///
/// Two stamps taken in the same wall-clock instant still order by `seq`.
/// Queues key on `seq` alone, since the wall clock can step backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub seq: u64,
}

impl Stamp {
    /// Take a new stamp; strictly greater `seq` than every earlier stamp
    pub fn now() -> Self {
        Self {
            at: Utc::now(),
            seq: SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Milliseconds since the Unix epoch
    pub fn millis(&self) -> i64 {
        self.at.timestamp_millis()
    }
}
