//! Duet Core - Shared types, wire protocol, and configuration
//!
//! This crate contains the foundational types used by both the signal
//! server and the client. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{ClientConfig, Config, ConfigError, ReconnectConfig, SignalConfig};
pub use error::*;
pub use protocol::*;
pub use types::*;

/// Default signal server port
pub const DEFAULT_PORT: u16 = 3001;

/// Handshake must reach `connected` within this window (15 seconds)
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 15_000;

/// Pause before re-queueing after a failed attempt (2 seconds)
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2_000;

/// Transport reconnection attempts before giving up
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between transport reconnection attempts (1 second)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;

/// Maximum inbound frame size (64 KB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
