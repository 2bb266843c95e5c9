//! Core type definitions for Duet
//!
//! Identifiers for sessions and rooms, the server-side session state, and
//! the client-observable connection status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of random bytes behind a generated identifier
const ID_BYTES: usize = 8;

/// Opaque identifier of one live connection to the relay
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

/// Identifier of an active two-party room
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random identifier (16 hex chars)
            pub fn generate() -> Self {
                Self(random_hex())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SessionId);
string_id!(RoomId);

fn random_hex() -> String {
    let mut bytes = [0u8; ID_BYTES];
    if getrandom::fill(&mut bytes).is_err() {
        // Entropy failure is not recoverable for id generation; fall back to
        // the clock so ids stay unique within this process.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        bytes = nanos.to_le_bytes();
    }
    hex::encode(bytes)
}

/// Server-side state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// In the match queue
    Waiting,
    /// Member of a room
    Paired,
    /// Connected but neither queued nor paired
    Disconnected,
}

/// Client-observable connection status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionStatus {
    /// Nothing started
    #[default]
    Idle,
    /// Waiting on the media-capture prompt
    RequestingPermissions,
    /// Queued for a partner
    Waiting,
    /// Matched, handshake in progress
    Connecting,
    /// Remote media is flowing
    Connected,
    /// See the accompanying error kind
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::RequestingPermissions => "requesting-permissions",
            ConnectionStatus::Waiting => "waiting",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client error taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Media capture denied or unavailable; only an explicit retry recovers
    Permissions,
    /// Handshake failed, timed out, or partner left; re-queued automatically
    Connection,
    /// Transport to the relay lost
    Network,
}

impl ErrorKind {
    /// Whether the kind waits for user action regardless of context.
    ///
    /// `Network` is only terminal once reconnection is exhausted, which the
    /// client tracks separately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorKind::Permissions)
    }
}
